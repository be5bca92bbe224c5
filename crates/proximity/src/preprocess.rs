//! Grayscale preprocessing before face location

use image::GrayImage;
use imageproc::contrast::equalize_histogram;
use imageproc::filter::gaussian_blur_f32;
use serde::{Deserialize, Serialize};

/// Detector input tuning. Both steps are off by default, so the locator
/// sees the raw grayscale frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Histogram-equalize the grayscale image
    pub equalize: bool,
    /// Gaussian blur sigma applied after equalization
    pub blur_sigma: Option<f32>,
}

impl PreprocessConfig {
    pub fn apply(&self, gray: GrayImage) -> GrayImage {
        let equalized = if self.equalize {
            equalize_histogram(&gray)
        } else {
            gray
        };
        match self.blur_sigma {
            Some(sigma) if sigma > 0.0 => gaussian_blur_f32(&equalized, sigma),
            _ => equalized,
        }
    }
}
