//! Rotary actuator abstraction.
//!
//! The variant is chosen once by [`open_actuator`]: a Linux sysfs PWM channel
//! when one can be claimed, otherwise a simulated servo with the same
//! interface. Nothing re-probes the hardware later.

mod hardware;
mod simulated;

pub use hardware::HardwareActuator;
pub use simulated::SimulatedActuator;

use serde::Serialize;
use tracing::info;

use crate::config::ActuatorConfig;
use crate::error::ActuatorError;

/// Duty cycle at 0 degrees.
pub const MIN_DUTY_PERCENT: f64 = 2.5;
/// Duty cycle span across the 0..180 degree travel.
pub const DUTY_SPAN_PERCENT: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ActuatorKind {
    Hardware,
    Simulated,
}

/// Low-level drive signal derived from an angle. Recomputed for every write.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ActuatorCommand {
    pub duty_cycle_percent: f64,
}

impl ActuatorCommand {
    /// 0° -> 2.5 %, 180° -> 12.5 %, clamped to a valid duty cycle.
    pub fn from_angle(angle: f64) -> Self {
        let duty = (angle / 180.0) * DUTY_SPAN_PERCENT + MIN_DUTY_PERCENT;
        Self {
            duty_cycle_percent: num_traits::clamp(duty, 0.0, 100.0),
        }
    }

    /// Active time within one PWM period.
    pub fn duty_ns(&self, period_ns: u64) -> u64 {
        (period_ns as f64 * self.duty_cycle_percent / 100.0).round() as u64
    }
}

pub trait Actuator: Send {
    /// Drive the output to `angle` degrees.
    fn set_angle(&mut self, angle: f64) -> Result<(), ActuatorError>;

    /// Last angle successfully commanded.
    fn current_angle(&self) -> f64;

    /// Free the underlying resource. Safe to call any number of times.
    fn release(&mut self);

    fn is_released(&self) -> bool;

    fn kind(&self) -> ActuatorKind;
}

/// Probe for a usable PWM channel and fall back to simulation when there is none.
///
/// Missing hardware is not an error. The only failure is a channel number the
/// chip itself reports as out of range.
pub fn open_actuator(
    config: &ActuatorConfig,
    initial_angle: f64,
) -> Result<Box<dyn Actuator>, ActuatorError> {
    if config.simulate {
        info!("Simulation forced by configuration");
        return Ok(Box::new(SimulatedActuator::new(initial_angle)));
    }

    match HardwareActuator::open(config, initial_angle) {
        Ok(Some(actuator)) => {
            info!(
                "Hardware servo initialized on pwmchip{}/pwm{} (GPIO {})",
                config.chip, config.channel, config.gpio_pin
            );
            Ok(Box::new(actuator))
        }
        Ok(None) => {
            info!("Hardware servo not available - running in simulation mode");
            Ok(Box::new(SimulatedActuator::new(initial_angle)))
        }
        Err(e @ ActuatorError::InvalidChannel { .. }) => Err(e),
        Err(e) => {
            info!("Hardware servo unusable ({}) - running in simulation mode", e);
            Ok(Box::new(SimulatedActuator::new(initial_angle)))
        }
    }
}
