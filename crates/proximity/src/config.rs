//! Proximity configuration

use serde::{Deserialize, Serialize};

use crate::detector::LocatorParams;
use crate::distance::Calibration;
use crate::preprocess::PreprocessConfig;
use crate::threat::ThreatConfig;

/// Named detector tuning. Only preprocessing and classifier settings change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TuningPreset {
    /// Equalized and lightly blurred detector input, lower score threshold
    Sensitive,
    /// Raw grayscale input, stricter classifier
    Strict,
}

/// Proximity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProximityConfig {
    /// Reference measurements for distance estimation
    pub calibration: Calibration,

    /// Threat threshold and episode duration
    pub threat: ThreatConfig,

    /// Face search parameters
    pub locator: LocatorParams,

    /// Detector input tuning
    pub preprocess: PreprocessConfig,

    /// SeetaFace model file (seeta_fd_frontal_v1.0.bin)
    pub model_path: Option<String>,

    /// SeetaFace classifier score threshold
    pub score_threshold: f64,

    /// Overrides the tuning keys above when set
    pub preset: Option<TuningPreset>,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            calibration: Calibration::default(),
            threat: ThreatConfig::default(),
            locator: LocatorParams::default(),
            preprocess: PreprocessConfig::default(),
            model_path: None,
            score_threshold: 2.0,
            preset: None,
        }
    }
}

impl ProximityConfig {
    pub fn sensitive() -> Self {
        Self::default().with_preset(TuningPreset::Sensitive)
    }

    pub fn strict() -> Self {
        Self::default().with_preset(TuningPreset::Strict)
    }

    pub fn with_preset(mut self, preset: TuningPreset) -> Self {
        self.apply_preset(preset);
        self
    }

    /// Overwrite preprocessing and classifier tuning with `preset`
    pub fn apply_preset(&mut self, preset: TuningPreset) {
        match preset {
            TuningPreset::Sensitive => {
                self.preprocess = PreprocessConfig {
                    equalize: true,
                    blur_sigma: Some(1.0),
                };
                self.score_threshold = 1.0;
            }
            TuningPreset::Strict => {
                self.preprocess = PreprocessConfig::default();
                self.locator.min_neighbors = 8;
                self.score_threshold = 3.0;
            }
        }
        self.preset = Some(preset);
    }

    /// Apply the configured preset, if any
    pub fn resolve_preset(&mut self) {
        if let Some(preset) = self.preset {
            self.apply_preset(preset);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_only_change_tuning() {
        let default = ProximityConfig::default();
        let sensitive = ProximityConfig::sensitive();
        let strict = ProximityConfig::strict();

        assert_eq!(sensitive.calibration, default.calibration);
        assert_eq!(strict.threat.threshold_m, default.threat.threshold_m);
        assert!(sensitive.preprocess.equalize);
        assert!(!strict.preprocess.equalize);
        assert!(sensitive.score_threshold < strict.score_threshold);
    }

    #[test]
    fn test_preset_keeps_geometry() {
        let mut config = ProximityConfig::default();
        config.threat.threshold_m = 0.5;
        config.locator.scale_factor = 1.1;
        config.preset = Some(TuningPreset::Strict);
        config.resolve_preset();

        assert_eq!(config.threat.threshold_m, 0.5);
        assert_eq!(config.locator.scale_factor, 1.1);
        assert_eq!(config.locator.min_neighbors, 8);
        assert_eq!(config.score_threshold, 3.0);
    }
}
