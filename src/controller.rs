//! Proportional pan controller.
//!
//! Maps the horizontal offset of the target from the frame center to a servo
//! angle, then bounds the move twice: a per-tick slew limit and a first-order
//! low-pass on the limited delta. There are no integral or derivative terms;
//! detections vanish and jump between frames and an accumulating term would
//! overshoot. The dead zone absorbs detector jitter near center.

use num_traits::clamp;
use tracing::{debug, warn};

use crate::actuator::Actuator;
use crate::config::ServoConfig;
use crate::error::{ActuatorError, ConfigError, TrackingError};

/// Angle plus the immutable tuning it is bounded by.
#[derive(Debug, Clone)]
pub struct ServoState {
    current_angle: f64,
    config: ServoConfig,
}

impl ServoState {
    /// Start at `center_angle`. Rejects any config that fails
    /// [`ServoConfig::validate`], since the bounds below rely on it.
    pub fn new(config: ServoConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            current_angle: config.center_angle,
            config,
        })
    }

    pub fn current_angle(&self) -> f64 {
        self.current_angle
    }

    pub fn config(&self) -> &ServoConfig {
        &self.config
    }

    pub fn clamp_angle(&self, angle: f64) -> f64 {
        clamp(angle, self.config.min_angle, self.config.max_angle)
    }

    fn set_current_angle(&mut self, angle: f64) {
        self.current_angle = angle;
        debug_assert!(
            self.current_angle >= self.config.min_angle && self.current_angle <= self.config.max_angle,
            "servo angle {} escaped [{}, {}]",
            self.current_angle,
            self.config.min_angle,
            self.config.max_angle
        );
    }
}

/// What a tracking step did with the actuator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Steering {
    /// Target inside the dead zone; no command issued.
    Hold(f64),
    /// New angle computed and sent to the actuator.
    Move(f64),
}

impl Steering {
    pub fn angle(&self) -> f64 {
        match *self {
            Steering::Hold(angle) | Steering::Move(angle) => angle,
        }
    }
}

/// Owns the servo state and the actuator it drives.
///
/// Every mutating method takes `&mut self`, so the automatic path and manual
/// overrides can never write the state at the same time.
pub struct TrackingController {
    state: ServoState,
    actuator: Box<dyn Actuator>,
}

impl TrackingController {
    pub fn new(config: ServoConfig, actuator: Box<dyn Actuator>) -> Result<Self, ConfigError> {
        Ok(Self {
            state: ServoState::new(config)?,
            actuator,
        })
    }

    pub fn state(&self) -> &ServoState {
        &self.state
    }

    pub fn current_angle(&self) -> f64 {
        self.state.current_angle
    }

    pub fn actuator(&self) -> &dyn Actuator {
        &*self.actuator
    }

    /// Next angle for a target at `target_center_x` in a frame `frame_width` pixels wide.
    ///
    /// Updates the stored angle but does not touch the actuator; see [`track`](Self::track).
    pub fn compute_next_angle(&mut self, target_center_x: f64, frame_width: i32) -> Result<f64, TrackingError> {
        self.step(target_center_x, frame_width).map(|s| s.angle())
    }

    /// Compute the next angle and send it to the actuator if it was recomputed.
    ///
    /// A failed actuator write is logged and otherwise ignored: the computed
    /// angle stays current and the next tick carries on.
    pub fn track(&mut self, target_center_x: f64, frame_width: i32) -> Result<Steering, TrackingError> {
        let steering = self.step(target_center_x, frame_width)?;
        if let Steering::Move(angle) = steering {
            self.actuate(angle);
        }
        Ok(steering)
    }

    fn step(&mut self, target_center_x: f64, frame_width: i32) -> Result<Steering, TrackingError> {
        // Integer center, as the detector pipeline reports pixel positions.
        let half_width = frame_width / 2;
        if half_width <= 0 {
            return Err(TrackingError::InvalidFrameGeometry { frame_width });
        }
        if !target_center_x.is_finite() {
            return Err(TrackingError::NonFiniteInput(target_center_x));
        }

        let cfg = &self.state.config;
        let half_width = half_width as f64;
        let offset = target_center_x - half_width;
        if offset.abs() < cfg.dead_zone_px {
            return Ok(Steering::Hold(self.state.current_angle));
        }

        let angle_change = (offset / half_width) * (cfg.max_angle - cfg.min_angle) * 0.5;
        let target = clamp(cfg.center_angle - angle_change, cfg.min_angle, cfg.max_angle);

        let current = self.state.current_angle;
        let diff = clamp(target - current, -cfg.max_speed_per_tick, cfg.max_speed_per_tick);
        let new_angle = self.state.clamp_angle(current + diff * cfg.smoothing_factor);

        debug!(
            "offset={:.1}px target={:.2}° angle {:.2}° -> {:.2}°",
            offset, target, current, new_angle
        );
        self.state.set_current_angle(new_angle);
        Ok(Steering::Move(new_angle))
    }

    /// Manual override: jump straight to `angle` (clamped), bypassing smoothing.
    pub fn set_absolute_angle(&mut self, angle: f64) -> Result<f64, ActuatorError> {
        // NaN would slip through the clamp.
        let angle = if angle.is_nan() {
            self.state.current_angle
        } else {
            self.state.clamp_angle(angle)
        };
        self.state.set_current_angle(angle);
        self.actuator.set_angle(angle)?;
        Ok(angle)
    }

    pub fn center(&mut self) -> Result<f64, ActuatorError> {
        self.set_absolute_angle(self.state.config.center_angle)
    }

    pub fn release(&mut self) {
        self.actuator.release();
    }

    /// Recenter and release. Used on every exit path of the control loop, so
    /// it only logs failures.
    pub fn shutdown(&mut self) {
        if let Err(e) = self.center() {
            warn!("Failed to center servo on shutdown: {}", e);
        }
        self.release();
    }

    fn actuate(&mut self, angle: f64) {
        if let Err(e) = self.actuator.set_angle(angle) {
            warn!("Servo write failed at {:.2}°: {}", angle, e);
        }
    }
}
