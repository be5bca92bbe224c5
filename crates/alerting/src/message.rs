//! Alert message content

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One notification per threat episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMessage {
    pub timestamp: DateTime<Utc>,
    pub subject: String,
    pub body: String,
    /// Measured distance that started the episode (meters)
    pub distance_m: f64,
    /// Configured threat threshold (meters)
    pub threshold_m: f64,
    /// Episode number since the guard was activated
    pub episode: u64,
}

impl AlertMessage {
    pub fn proximity(
        distance_m: f64,
        threshold_m: f64,
        episode: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            timestamp,
            subject: format!("Proximity alert: face at {:.2}m", distance_m),
            body: format!(
                "A face was detected {:.2}m from the camera (threshold {:.2}m) at {}.",
                distance_m,
                threshold_m,
                timestamp.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            distance_m,
            threshold_m,
            episode,
        }
    }
}
