//! Proximity analysis
//!
//! Everything the detection loop needs to judge a frame:
//! - Face location on grayscale images (SeetaFace cascade or scripted mock)
//! - Grayscale preprocessing (equalization, blur)
//! - Pinhole-camera distance estimation from face width
//! - Threat episode tracking with a cooldown

pub mod config;
pub mod detector;
pub mod distance;
pub mod preprocess;
pub mod threat;

pub use config::{ProximityConfig, TuningPreset};
pub use detector::{
    Detection, FaceLocator, LocatorFactory, LocatorParams, ScriptedLocator,
    ScriptedLocatorFactory, SeetaFaceFactory, SeetaFaceLocator,
};
pub use distance::{Calibration, DistanceEstimator};
pub use preprocess::PreprocessConfig;
pub use threat::{ThreatConfig, ThreatMonitor, ThreatState, ThreatTransition};

use thiserror::Error;

/// Proximity error types
#[derive(Error, Debug)]
pub enum ProximityError {
    #[error("Invalid calibration: {0}")]
    Calibration(String),

    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Detection failed: {0}")]
    Detection(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
