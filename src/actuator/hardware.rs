use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use super::{Actuator, ActuatorCommand, ActuatorKind};
use crate::config::ActuatorConfig;
use crate::error::ActuatorError;

const EXPORT_POLL: Duration = Duration::from_millis(10);
const EXPORT_ATTEMPTS: u32 = 20;

/// Servo on a Linux sysfs PWM channel (`<root>/pwmchipN/pwmM`).
///
/// The channel is exported and enabled on construction and released again by
/// [`Actuator::release`] or on drop, whichever comes first.
#[derive(Debug)]
pub struct HardwareActuator {
    chip_dir: PathBuf,
    pwm_dir: PathBuf,
    channel: u32,
    period_ns: u64,
    settle: Duration,
    current_angle: f64,
    acquired: bool,
    enabled: bool,
}

impl HardwareActuator {
    /// Claim the configured channel.
    ///
    /// Returns `Ok(None)` when the chip does not exist on this machine.
    pub fn open(config: &ActuatorConfig, initial_angle: f64) -> Result<Option<Self>, ActuatorError> {
        let chip_dir = config.sysfs_root.join(format!("pwmchip{}", config.chip));
        if !chip_dir.is_dir() {
            return Ok(None);
        }

        if let Some(available) = read_npwm(&chip_dir) {
            if config.channel >= available {
                return Err(ActuatorError::InvalidChannel {
                    chip: config.chip,
                    channel: config.channel,
                    available,
                });
            }
        }

        let mut actuator = Self {
            pwm_dir: chip_dir.join(format!("pwm{}", config.channel)),
            chip_dir,
            channel: config.channel,
            period_ns: config.period_ns,
            settle: Duration::from_millis(config.settle_ms),
            current_angle: initial_angle,
            acquired: false,
            enabled: false,
        };
        actuator.acquire()?;
        Ok(Some(actuator))
    }

    pub fn pwm_dir(&self) -> &Path {
        &self.pwm_dir
    }

    fn acquire(&mut self) -> Result<(), ActuatorError> {
        if !self.pwm_dir.is_dir() {
            write_attr(&self.chip_dir.join("export"), self.channel)?;
            let mut attempts = 0;
            while !self.pwm_dir.is_dir() {
                attempts += 1;
                if attempts > EXPORT_ATTEMPTS {
                    return Err(ActuatorError::ExportTimeout(self.pwm_dir.clone()));
                }
                thread::sleep(EXPORT_POLL);
            }
        }

        // The kernel rejects a duty cycle longer than the current period, so
        // the period goes first.
        write_attr(&self.pwm_dir.join("period"), self.period_ns)?;
        write_attr(&self.pwm_dir.join("duty_cycle"), 0)?;
        write_attr(&self.pwm_dir.join("enable"), 1)?;
        self.acquired = true;
        self.enabled = true;
        debug!("Acquired {}", self.pwm_dir.display());
        Ok(())
    }
}

impl Actuator for HardwareActuator {
    fn set_angle(&mut self, angle: f64) -> Result<(), ActuatorError> {
        if !self.acquired {
            self.acquire()?;
        } else if !self.enabled {
            write_attr(&self.pwm_dir.join("enable"), 1)?;
            self.enabled = true;
        }

        let command = ActuatorCommand::from_angle(angle);
        let duty_path = self.pwm_dir.join("duty_cycle");
        write_attr(&duty_path, command.duty_ns(self.period_ns))?;
        self.current_angle = angle;
        if !self.settle.is_zero() {
            thread::sleep(self.settle);
        }

        // Zeroing stops the servo hunting between commands. If that fails the
        // pulse is still live, so cut the output instead.
        if let Err(e) = write_attr(&duty_path, 0) {
            match write_attr(&self.pwm_dir.join("enable"), 0) {
                Ok(()) => self.enabled = false,
                Err(disable) => warn!("Servo output left active: {}", disable),
            }
            return Err(e);
        }
        Ok(())
    }

    fn current_angle(&self) -> f64 {
        self.current_angle
    }

    fn release(&mut self) {
        if !self.acquired {
            return;
        }
        self.acquired = false;
        self.enabled = false;

        for (attr, value) in [("duty_cycle", 0), ("enable", 0)] {
            if let Err(e) = write_attr(&self.pwm_dir.join(attr), value) {
                warn!("Releasing servo: {}", e);
            }
        }
        if let Err(e) = write_attr(&self.chip_dir.join("unexport"), self.channel) {
            warn!("Releasing servo: {}", e);
        }
        debug!("Released {}", self.pwm_dir.display());
    }

    fn is_released(&self) -> bool {
        !self.acquired
    }

    fn kind(&self) -> ActuatorKind {
        ActuatorKind::Hardware
    }
}

impl Drop for HardwareActuator {
    fn drop(&mut self) {
        self.release();
    }
}

fn write_attr(path: &Path, value: impl ToString) -> Result<(), ActuatorError> {
    fs::write(path, value.to_string()).map_err(|e| ActuatorError::io(path, e))
}

fn read_npwm(chip_dir: &Path) -> Option<u32> {
    fs::read_to_string(chip_dir.join("npwm"))
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::TempDir;

    /// Lay out a chip with the channel directory already present, as udev
    /// would leave it after export.
    fn fake_sysfs(npwm: u32) -> TempDir {
        let root = tempfile::tempdir().unwrap();
        let chip = root.path().join("pwmchip0");
        fs::create_dir_all(chip.join("pwm0")).unwrap();
        fs::write(chip.join("npwm"), format!("{}\n", npwm)).unwrap();
        root
    }

    fn config(root: &TempDir) -> ActuatorConfig {
        ActuatorConfig {
            sysfs_root: root.path().to_path_buf(),
            settle_ms: 0,
            ..Default::default()
        }
    }

    fn read(path: PathBuf) -> String {
        fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_open_enables_channel() {
        let root = fake_sysfs(2);
        let servo = HardwareActuator::open(&config(&root), 90.0).unwrap().unwrap();

        assert_eq!(read(servo.pwm_dir().join("period")), "20000000");
        assert_eq!(read(servo.pwm_dir().join("duty_cycle")), "0");
        assert_eq!(read(servo.pwm_dir().join("enable")), "1");
        assert!(!servo.is_released());
        assert_eq!(servo.kind(), ActuatorKind::Hardware);
    }

    #[test]
    fn test_missing_chip() {
        let root = tempfile::tempdir().unwrap();
        assert!(HardwareActuator::open(&config(&root), 90.0).unwrap().is_none());
    }

    #[test]
    fn test_set_angle_zeroes_after_settle() {
        let root = fake_sysfs(1);
        let mut servo = HardwareActuator::open(&config(&root), 90.0).unwrap().unwrap();

        servo.set_angle(180.0).unwrap();
        assert_relative_eq!(servo.current_angle(), 180.0);
        assert_eq!(read(servo.pwm_dir().join("duty_cycle")), "0");
    }

    #[test]
    fn test_write_failure_keeps_last_angle() {
        let root = fake_sysfs(1);
        let mut servo = HardwareActuator::open(&config(&root), 90.0).unwrap().unwrap();

        fs::remove_dir_all(servo.pwm_dir()).unwrap();
        fs::create_dir_all(servo.pwm_dir().join("duty_cycle")).unwrap();

        assert!(matches!(servo.set_angle(10.0), Err(ActuatorError::Io { .. })));
        assert_relative_eq!(servo.current_angle(), 90.0);
    }

    #[test]
    fn test_failed_zeroing_disables_output() {
        let root = fake_sysfs(1);
        let mut servo = HardwareActuator::open(
            &ActuatorConfig {
                settle_ms: 300,
                ..config(&root)
            },
            90.0,
        )
        .unwrap()
        .unwrap();

        // Make the duty cycle unwritable while the servo is settling.
        let duty_path = servo.pwm_dir().join("duty_cycle");
        let blocker = {
            let duty_path = duty_path.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                fs::remove_file(&duty_path).unwrap();
                fs::create_dir(&duty_path).unwrap();
            })
        };

        assert!(matches!(servo.set_angle(120.0), Err(ActuatorError::Io { .. })));
        blocker.join().unwrap();
        assert_eq!(read(servo.pwm_dir().join("enable")), "0");
        assert_relative_eq!(servo.current_angle(), 120.0);
        assert!(!servo.is_released());

        // Once the attribute works again the next command re-enables the output.
        fs::remove_dir(&duty_path).unwrap();
        servo.set_angle(60.0).unwrap();
        assert_eq!(read(servo.pwm_dir().join("enable")), "1");
        assert_eq!(read(duty_path), "0");
    }

    #[test]
    fn test_release_is_idempotent_and_unexports() {
        let root = fake_sysfs(1);
        let mut servo = HardwareActuator::open(&config(&root), 90.0).unwrap().unwrap();

        servo.release();
        servo.release();
        assert!(servo.is_released());
        assert_eq!(read(servo.pwm_dir().join("enable")), "0");
        assert_eq!(read(root.path().join("pwmchip0").join("unexport")), "0");

        // Next command claims the channel again.
        servo.set_angle(45.0).unwrap();
        assert!(!servo.is_released());
        assert_eq!(read(servo.pwm_dir().join("enable")), "1");
    }

    #[test]
    fn test_drop_releases() {
        let root = fake_sysfs(1);
        let pwm_dir = {
            let servo = HardwareActuator::open(&config(&root), 90.0).unwrap().unwrap();
            servo.pwm_dir().to_path_buf()
        };
        assert_eq!(read(pwm_dir.join("enable")), "0");
    }

    #[test]
    fn test_export_timeout() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("pwmchip0")).unwrap();

        assert!(matches!(
            HardwareActuator::open(&config(&root), 90.0),
            Err(ActuatorError::ExportTimeout(_))
        ));
        assert_eq!(read(root.path().join("pwmchip0").join("export")), "0");
    }
}
