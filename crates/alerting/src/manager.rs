//! Alert configuration and throttling

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::mqtt::MqttConfig;

/// Where alerts are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertChannel {
    /// Log only
    #[default]
    Log,
    /// Publish JSON to an MQTT broker
    Mqtt,
}

/// Alert configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Delivery channel
    pub channel: AlertChannel,
    /// Maximum alerts per hour before throttling
    pub max_alerts_per_hour: usize,
    /// Broker settings, used when `channel = "mqtt"`
    pub mqtt: MqttConfig,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            channel: AlertChannel::Log,
            max_alerts_per_hour: 30,
            mqtt: MqttConfig::default(),
        }
    }
}

/// Hourly cap on outgoing alerts.
///
/// Threat episodes already limit alerts to one per episode; the cap bounds
/// the damage of a very short episode duration.
pub struct AlertThrottle {
    max_per_hour: usize,
    hourly_count: usize,
    hour_start: Instant,
    suppressed: usize,
}

impl AlertThrottle {
    pub fn new(max_per_hour: usize) -> Self {
        info!("Creating alert throttle: max {} alerts/hour", max_per_hour);
        Self {
            max_per_hour,
            hourly_count: 0,
            hour_start: Instant::now(),
            suppressed: 0,
        }
    }

    /// Check and record one alert at `now`
    pub fn allow(&mut self, now: Instant) -> bool {
        // Reset hourly counter if needed
        if now.saturating_duration_since(self.hour_start) >= Duration::from_secs(3600) {
            debug!("Alert throttle window reset");
            self.hourly_count = 0;
            self.hour_start = now;
        }

        if self.hourly_count >= self.max_per_hour {
            self.suppressed += 1;
            warn!("Alert throttled: max alerts per hour reached");
            return false;
        }

        self.hourly_count += 1;
        true
    }

    /// Alerts sent in the current window
    pub fn hourly_count(&self) -> usize {
        self.hourly_count
    }

    /// Alerts dropped by the cap since creation
    pub fn suppressed(&self) -> usize {
        self.suppressed
    }
}
