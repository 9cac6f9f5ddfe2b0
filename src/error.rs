use std::path::PathBuf;
use thiserror::Error;

/// Rejected configuration values.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be finite, got {value}")]
    NotFinite { field: &'static str, value: f64 },

    #[error("min_angle ({min}) must be below max_angle ({max})")]
    EmptyRange { min: f64, max: f64 },

    #[error("center_angle {center} lies outside [{min}, {max}]")]
    CenterOutOfRange { center: f64, min: f64, max: f64 },

    #[error("dead_zone_px must not be negative, got {0}")]
    NegativeDeadZone(f64),

    #[error("smoothing_factor must be in (0, 1], got {0}")]
    SmoothingOutOfRange(f64),

    #[error("max_speed_per_tick must be positive, got {0}")]
    NonPositiveSpeed(f64),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Per-tick failures of the tracking computation. None of them mutate state.
#[derive(Debug, Error, PartialEq)]
pub enum TrackingError {
    #[error("invalid frame geometry: width {frame_width} leaves no frame center")]
    InvalidFrameGeometry { frame_width: i32 },

    #[error("target position is not a finite number: {0}")]
    NonFiniteInput(f64),
}

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("pwm i/o failed on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("pwm channel {channel} out of range, chip {chip} exposes {available}")]
    InvalidChannel { chip: u32, channel: u32, available: u32 },

    #[error("pwm channel {0} did not appear after export")]
    ExportTimeout(PathBuf),
}

impl ActuatorError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("control loop is already running")]
    AlreadyRunning,

    #[error("control loop is not running")]
    NotRunning,

    #[error("manual command queue is full")]
    CommandQueueFull,

    #[error("control loop worker is gone")]
    WorkerGone,

    #[error("failed to spawn control loop worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("control loop worker panicked")]
    WorkerPanicked,

    #[error("tracking controller is no longer available")]
    ControllerLost,

    #[error(transparent)]
    Actuator(#[from] ActuatorError),
}
