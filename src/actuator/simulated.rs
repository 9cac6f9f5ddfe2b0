use tracing::debug;

use super::{Actuator, ActuatorCommand, ActuatorKind};
use crate::error::ActuatorError;

/// Stand-in servo that only records what it was told.
#[derive(Debug, Clone)]
pub struct SimulatedActuator {
    current_angle: f64,
    last_command: Option<ActuatorCommand>,
    commands: u64,
    released: bool,
}

impl SimulatedActuator {
    pub fn new(initial_angle: f64) -> Self {
        Self {
            current_angle: initial_angle,
            last_command: None,
            commands: 0,
            released: false,
        }
    }

    pub fn last_command(&self) -> Option<ActuatorCommand> {
        self.last_command
    }

    /// Number of `set_angle` calls so far.
    pub fn commands(&self) -> u64 {
        self.commands
    }
}

impl Actuator for SimulatedActuator {
    fn set_angle(&mut self, angle: f64) -> Result<(), ActuatorError> {
        let command = ActuatorCommand::from_angle(angle);
        debug!(
            "Servo simulation: moving to {:.1}° (duty {:.2}%)",
            angle, command.duty_cycle_percent
        );
        self.current_angle = angle;
        self.last_command = Some(command);
        self.commands += 1;
        self.released = false;
        Ok(())
    }

    fn current_angle(&self) -> f64 {
        self.current_angle
    }

    fn release(&mut self) {
        if !self.released {
            debug!("Servo simulation: released at {:.1}°", self.current_angle);
        }
        self.released = true;
    }

    fn is_released(&self) -> bool {
        self.released
    }

    fn kind(&self) -> ActuatorKind {
        ActuatorKind::Simulated
    }
}
