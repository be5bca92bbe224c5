//! Proximity Guard
//!
//! Ties the camera, face locator, threat monitor and alert dispatcher into a
//! background detection loop that an operator starts and stops with text
//! commands.

pub mod annotate;
pub mod command;
pub mod config;
pub mod controller;
pub mod detection;
pub mod display;

pub use annotate::{AnnotatedFrame, Annotator, Measurement};
pub use command::{Command, Status};
pub use config::{DisplayConfig, GuardConfig, LoggingConfig, LoopConfig};
pub use controller::{Guard, GuardEvents, GuardSnapshot};
pub use detection::{
    CancelToken, Clock, DetectionLoop, LoopPhase, RunStats, Step, SystemClock, WorkerEvent,
    WorkerEventKind,
};
pub use display::{DisplayFrame, DisplayPublisher, DisplayReceiver};

use alerting::AlertError;
use camera_capture::CameraError;
use proximity::ProximityError;
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Guard error types
#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Proximity error: {0}")]
    Proximity(#[from] ProximityError),

    #[error("Alert error: {0}")]
    Alert(#[from] AlertError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Giving up after {0} consecutive frame failures")]
    TooManyFailures(u32),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::config::ConfigError> for GuardError {
    fn from(err: ::config::ConfigError) -> Self {
        GuardError::Config(err.to_string())
    }
}

/// Initialize the global tracing subscriber
pub fn init_logging(config: &LoggingConfig) -> Result<(), GuardError> {
    let level: Level = config
        .level
        .parse()
        .map_err(|_| GuardError::Config(format!("unknown log level '{}'", config.level)))?;

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    let result = if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    result.map_err(|e| GuardError::Logging(e.to_string()))
}
