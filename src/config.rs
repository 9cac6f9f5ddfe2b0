use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub servo: ServoConfig,
    pub actuator: ActuatorConfig,
    pub control: LoopConfig,
}

/// Controller tuning. Defaults are the hand-tuned values of the face tracker rig.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoConfig {
    pub min_angle: f64,
    pub max_angle: f64,
    pub center_angle: f64,
    /// Pixels either side of the frame center that produce no command.
    pub dead_zone_px: f64,
    /// 0.1 = very smooth, 0.9 = very responsive.
    pub smoothing_factor: f64,
    /// Degrees.
    pub max_speed_per_tick: f64,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            min_angle: 0.0,
            max_angle: 180.0,
            center_angle: 90.0,
            dead_zone_px: 20.0,
            smoothing_factor: 0.3,
            max_speed_per_tick: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    /// `pwmchipN` under `sysfs_root`.
    pub chip: u32,
    /// `pwmM` on the chip.
    pub channel: u32,
    /// BCM pin the channel is muxed to. The kernel owns the mux, so this is
    /// only reported in logs.
    pub gpio_pin: u8,
    pub sysfs_root: PathBuf,
    /// 20 ms = 50 Hz hobby servo frame.
    pub period_ns: u64,
    /// Hold time after each command before the signal is zeroed.
    pub settle_ms: u64,
    /// Skip the hardware probe.
    pub simulate: bool,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            chip: 0,
            channel: 0,
            gpio_pin: 18,
            sysfs_root: PathBuf::from("/sys/class/pwm"),
            period_ns: 20_000_000,
            settle_ms: 100,
            simulate: false,
        }
    }
}

/// Channel capacities between producer, worker and observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub frame_queue: usize,
    pub update_queue: usize,
    pub command_queue: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            frame_queue: 4,
            update_queue: 64,
            command_queue: 16,
        }
    }
}

impl Config {
    /// Load from a JSON file and validate it.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let cfg: Config = serde_json::from_str(&data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.servo.validate()?;
        if self.actuator.period_ns == 0 {
            return Err(ConfigError::Zero("period_ns"));
        }
        self.control.validate()
    }
}

impl ServoConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("min_angle", self.min_angle),
            ("max_angle", self.max_angle),
            ("center_angle", self.center_angle),
            ("dead_zone_px", self.dead_zone_px),
            ("smoothing_factor", self.smoothing_factor),
            ("max_speed_per_tick", self.max_speed_per_tick),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::NotFinite { field, value });
            }
        }
        if self.min_angle >= self.max_angle {
            return Err(ConfigError::EmptyRange {
                min: self.min_angle,
                max: self.max_angle,
            });
        }
        if self.center_angle < self.min_angle || self.center_angle > self.max_angle {
            return Err(ConfigError::CenterOutOfRange {
                center: self.center_angle,
                min: self.min_angle,
                max: self.max_angle,
            });
        }
        if self.dead_zone_px < 0.0 {
            return Err(ConfigError::NegativeDeadZone(self.dead_zone_px));
        }
        if self.smoothing_factor <= 0.0 || self.smoothing_factor > 1.0 {
            return Err(ConfigError::SmoothingOutOfRange(self.smoothing_factor));
        }
        if self.max_speed_per_tick <= 0.0 {
            return Err(ConfigError::NonPositiveSpeed(self.max_speed_per_tick));
        }
        Ok(())
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_queue == 0 {
            return Err(ConfigError::Zero("frame_queue"));
        }
        if self.update_queue == 0 {
            return Err(ConfigError::Zero("update_queue"));
        }
        if self.command_queue == 0 {
            return Err(ConfigError::Zero("command_queue"));
        }
        Ok(())
    }
}
