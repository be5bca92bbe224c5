//! Pinhole-camera distance estimation

use serde::{Deserialize, Serialize};

use crate::ProximityError;

/// Reference measurements used to derive the focal length
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Calibration {
    /// Average face width (meters)
    pub known_face_width_m: f64,
    /// Distance at which the reference width was measured (meters)
    pub known_distance_m: f64,
    /// Face width in pixels at the reference distance
    pub known_pixels: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            known_face_width_m: 0.15,
            known_distance_m: 1.0,
            known_pixels: 200.0,
        }
    }
}

impl Calibration {
    /// Focal length in pixels
    pub fn focal_length(&self) -> f64 {
        self.known_pixels * self.known_distance_m / self.known_face_width_m
    }

    fn validate(&self) -> Result<(), ProximityError> {
        let fields = [
            ("known_face_width_m", self.known_face_width_m),
            ("known_distance_m", self.known_distance_m),
            ("known_pixels", self.known_pixels),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value <= 0.0 {
                return Err(ProximityError::Calibration(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Maps an observed face width to a distance
#[derive(Debug, Clone, Copy)]
pub struct DistanceEstimator {
    calibration: Calibration,
    focal_length: f64,
}

impl DistanceEstimator {
    pub fn new(calibration: Calibration) -> Result<Self, ProximityError> {
        calibration.validate()?;
        Ok(Self {
            focal_length: calibration.focal_length(),
            calibration,
        })
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn focal_length(&self) -> f64 {
        self.focal_length
    }

    /// Estimated distance in meters, or `None` for a non-positive width.
    pub fn estimate(&self, face_width_px: i32) -> Option<f64> {
        if face_width_px <= 0 {
            return None;
        }
        Some(self.calibration.known_face_width_m * self.focal_length / face_width_px as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn estimator() -> DistanceEstimator {
        DistanceEstimator::new(Calibration::default()).unwrap()
    }

    #[test]
    fn test_focal_length() {
        assert!((Calibration::default().focal_length() - 1333.333).abs() < 1e-3);
    }

    #[test]
    fn test_reference_width_gives_reference_distance() {
        let distance = estimator().estimate(200).unwrap();
        assert!((distance - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_double_width_halves_distance() {
        let distance = estimator().estimate(400).unwrap();
        assert!((distance - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_widths_are_skipped() {
        assert_eq!(estimator().estimate(0), None);
        assert_eq!(estimator().estimate(-12), None);
    }

    #[test]
    fn test_rejects_bad_calibration() {
        let zero_width = Calibration {
            known_face_width_m: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            DistanceEstimator::new(zero_width),
            Err(ProximityError::Calibration(_))
        ));

        let nan_pixels = Calibration {
            known_pixels: f64::NAN,
            ..Default::default()
        };
        assert!(DistanceEstimator::new(nan_pixels).is_err());
    }

    proptest! {
        #[test]
        fn prop_estimate_matches_formula(w in 1i32..10_000) {
            let est = estimator();
            let c = est.calibration();
            let expected = c.known_face_width_m * c.focal_length() / w as f64;
            prop_assert!((est.estimate(w).unwrap() - expected).abs() < 1e-9);
        }

        #[test]
        fn prop_estimate_decreases_with_width(w in 1i32..10_000, extra in 1i32..1_000) {
            let est = estimator();
            prop_assert!(est.estimate(w + extra).unwrap() < est.estimate(w).unwrap());
        }

        #[test]
        fn prop_non_positive_width_is_rejected(w in i32::MIN..=0) {
            prop_assert!(estimator().estimate(w).is_none());
        }
    }
}
