//! Guard configuration
//!
//! Loaded from an optional TOML file and `GUARD__*` environment variables,
//! e.g. `GUARD__ALERTS__MQTT__PASSWORD` or `GUARD__PROXIMITY__THREAT__THRESHOLD_M`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ::config::{Config, Environment, File, FileFormat};
use alerting::AlertConfig;
use camera_capture::CameraConfig;
use proximity::{DistanceEstimator, ProximityConfig};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::GuardError;

/// Config file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "proximity-guard.toml";

const ENV_PREFIX: &str = "GUARD";
const ENV_SEPARATOR: &str = "__";

/// Detection loop tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Pause after a failed frame (milliseconds)
    pub retry_backoff_ms: u64,
    /// Consecutive failed frames before the run is abandoned.
    /// Unset keeps retrying for as long as the device stays connected.
    pub max_consecutive_failures: Option<u32>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            retry_backoff_ms: 100,
            max_consecutive_failures: None,
        }
    }
}

/// Display sink settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Write the latest annotated frame here (format from the extension)
    pub preview_path: Option<PathBuf>,
    /// Minimum time between preview writes (milliseconds)
    pub preview_interval_ms: u64,
    /// TTF/OTF font for overlay labels; labels are not drawn without one
    pub font_path: Option<PathBuf>,
    /// Label height in pixels
    pub label_scale: f32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            preview_path: None,
            preview_interval_ms: 1000,
            font_path: None,
            label_scale: 24.0,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Complete guard configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub camera: CameraConfig,
    pub proximity: ProximityConfig,
    pub alerts: AlertConfig,
    pub detection: LoopConfig,
    pub display: DisplayConfig,
    pub logging: LoggingConfig,
    /// Use the synthetic camera and scripted face locator
    pub mock: bool,
}

impl GuardConfig {
    /// Load from `path` (required to exist) or the default file (optional),
    /// then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, GuardError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let builder = Config::builder()
            .add_source(file)
            .add_source(environment(None));
        let mut config: GuardConfig = builder.build()?.try_deserialize()?;
        config.proximity.resolve_preset();
        debug!("Loaded configuration: {:?}", config);
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML text, with an optional substitute environment
    pub fn from_toml_str(
        toml: &str,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, GuardError> {
        let mut config: GuardConfig = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .add_source(environment(env))
            .build()?
            .try_deserialize()?;
        config.proximity.resolve_preset();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), GuardError> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(GuardError::Config("camera resolution must be non-zero".to_string()));
        }
        let threat = &self.proximity.threat;
        if !(threat.threshold_m.is_finite() && threat.threshold_m > 0.0) {
            return Err(GuardError::Config(format!(
                "threat threshold must be a positive distance, got {}",
                threat.threshold_m
            )));
        }
        if threat.duration_secs == 0 {
            return Err(GuardError::Config("threat duration must be at least 1s".to_string()));
        }
        DistanceEstimator::new(self.proximity.calibration)
            .map_err(|e| GuardError::Config(e.to_string()))?;
        let scale_factor = self.proximity.locator.scale_factor;
        if !(scale_factor.is_finite() && scale_factor > 1.0) {
            return Err(GuardError::Config("locator scale_factor must be > 1.0".to_string()));
        }
        Ok(())
    }
}

fn environment(source: Option<HashMap<String, String>>) -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
        .source(source)
}
