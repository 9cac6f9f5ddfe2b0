pub mod actuator;
pub mod config;
pub mod control_loop;
pub mod controller;
pub mod detection;
pub mod error;
pub mod logging;
pub mod selector;
pub mod source;

// Re-export main types
pub use crate::actuator::{open_actuator, Actuator, ActuatorCommand, ActuatorKind};
pub use crate::config::Config;
pub use crate::control_loop::{AngleUpdate, ControlLoop, FrameSender, LoopState, ManualControl, TickStatus};
pub use crate::controller::{ServoState, Steering, TrackingController};
pub use crate::detection::{BoundingBox, DetectionFrame};
pub use crate::error::{ActuatorError, ConfigError, LoopError, TrackingError};
pub use crate::selector::select_target;
