//! Threat episode tracking
//!
//! A threat starts when a face is measured closer than the threshold and
//! lasts for a fixed duration. Close detections inside an episode are
//! absorbed, so one episode produces one alert no matter the frame rate.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Threat configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreatConfig {
    /// A face closer than this is a threat (meters)
    pub threshold_m: f64,
    /// Length of one threat episode (seconds)
    pub duration_secs: u64,
}

impl Default for ThreatConfig {
    fn default() -> Self {
        Self {
            threshold_m: 1.0,
            duration_secs: 60,
        }
    }
}

/// Observable threat state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreatState {
    #[default]
    Idle,
    Active,
}

/// Result of feeding the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreatTransition {
    /// Nothing changed
    None,
    /// Idle -> Active; the caller raises exactly one alert
    Started,
    /// Active -> Idle after the duration elapsed
    Cleared,
}

/// Threat state machine. Time is supplied by the caller.
#[derive(Debug, Clone)]
pub struct ThreatMonitor {
    threshold_m: f64,
    duration: Duration,
    /// Set if and only if a threat is active
    started_at: Option<Instant>,
    episodes: u64,
}

impl ThreatMonitor {
    pub fn new(config: &ThreatConfig) -> Self {
        Self {
            threshold_m: config.threshold_m,
            duration: Duration::from_secs(config.duration_secs),
            started_at: None,
            episodes: 0,
        }
    }

    pub fn threshold_m(&self) -> f64 {
        self.threshold_m
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn state(&self) -> ThreatState {
        if self.started_at.is_some() {
            ThreatState::Active
        } else {
            ThreatState::Idle
        }
    }

    pub fn is_active(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    /// Number of episodes started since creation
    pub fn episodes(&self) -> u64 {
        self.episodes
    }

    /// Time left in the current episode
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.started_at
            .map(|started| self.duration.saturating_sub(now.saturating_duration_since(started)))
    }

    /// End the current episode once its duration has elapsed
    pub fn expire(&mut self, now: Instant) -> ThreatTransition {
        match self.started_at {
            Some(started) if now.saturating_duration_since(started) >= self.duration => {
                self.started_at = None;
                info!("Threat episode {} cleared", self.episodes);
                ThreatTransition::Cleared
            }
            _ => ThreatTransition::None,
        }
    }

    /// Feed one distance measurement
    pub fn observe(&mut self, distance_m: f64, now: Instant) -> ThreatTransition {
        if distance_m >= self.threshold_m {
            return ThreatTransition::None;
        }
        if self.started_at.is_some() {
            debug!("Close face at {:.2}m absorbed by active episode", distance_m);
            return ThreatTransition::None;
        }

        self.started_at = Some(now);
        self.episodes += 1;
        info!(
            "Threat episode {} started: face at {:.2}m < {:.2}m",
            self.episodes, distance_m, self.threshold_m
        );
        ThreatTransition::Started
    }

    /// Drop any active episode (on deactivation)
    pub fn reset(&mut self) {
        self.started_at = None;
    }
}

impl Default for ThreatMonitor {
    fn default() -> Self {
        Self::new(&ThreatConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(duration_secs: u64) -> ThreatMonitor {
        ThreatMonitor::new(&ThreatConfig {
            threshold_m: 1.0,
            duration_secs,
        })
    }

    /// Drive one simulated frame the way the detection loop does
    fn frame(monitor: &mut ThreatMonitor, distance: f64, now: Instant) -> ThreatTransition {
        monitor.expire(now);
        monitor.observe(distance, now)
    }

    #[test]
    fn test_far_face_stays_idle() {
        let mut m = monitor(60);
        assert_eq!(m.observe(2.5, Instant::now()), ThreatTransition::None);
        assert_eq!(m.state(), ThreatState::Idle);
        assert!(m.started_at().is_none());
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let mut m = monitor(60);
        assert_eq!(m.observe(1.0, Instant::now()), ThreatTransition::None);
        assert!(!m.is_active());
    }

    #[test]
    fn test_one_start_per_episode() {
        let mut m = monitor(60);
        let t0 = Instant::now();

        let starts = (0..300)
            .map(|i| frame(&mut m, 0.4, t0 + Duration::from_millis(100 * i)))
            .filter(|t| *t == ThreatTransition::Started)
            .count();

        // 300 frames at 10fps = 30s, inside one 60s episode
        assert_eq!(starts, 1);
        assert_eq!(m.state(), ThreatState::Active);
        assert_eq!(m.started_at(), Some(t0));
    }

    #[test]
    fn test_expires_after_duration() {
        let mut m = monitor(60);
        let t0 = Instant::now();
        assert_eq!(m.observe(0.5, t0), ThreatTransition::Started);

        assert_eq!(m.expire(t0 + Duration::from_secs(59)), ThreatTransition::None);
        assert!(m.is_active());

        assert_eq!(m.expire(t0 + Duration::from_secs(60)), ThreatTransition::Cleared);
        assert_eq!(m.state(), ThreatState::Idle);
        assert!(m.started_at().is_none());
    }

    #[test]
    fn test_new_episode_after_expiry_starts_once_more() {
        let mut m = monitor(60);
        let t0 = Instant::now();
        assert_eq!(frame(&mut m, 0.5, t0), ThreatTransition::Started);

        // far frames after expiry
        assert_eq!(frame(&mut m, 3.0, t0 + Duration::from_secs(61)), ThreatTransition::None);
        assert_eq!(m.state(), ThreatState::Idle);

        let t1 = t0 + Duration::from_secs(70);
        assert_eq!(frame(&mut m, 0.5, t1), ThreatTransition::Started);
        assert_eq!(frame(&mut m, 0.5, t1 + Duration::from_secs(1)), ThreatTransition::None);
        assert_eq!(m.episodes(), 2);
    }

    #[test]
    fn test_sustained_presence_starts_one_episode_per_duration() {
        let mut m = monitor(10);
        let t0 = Instant::now();

        // 25 seconds of continuous close frames at 10fps
        let starts = (0..250)
            .map(|i| frame(&mut m, 0.3, t0 + Duration::from_millis(100 * i)))
            .filter(|t| *t == ThreatTransition::Started)
            .count();

        assert_eq!(starts, 3);
        assert_eq!(m.episodes(), 3);
    }

    #[test]
    fn test_remaining_and_reset() {
        let mut m = monitor(60);
        let t0 = Instant::now();
        assert_eq!(m.remaining(t0), None);

        m.observe(0.2, t0);
        assert_eq!(m.remaining(t0 + Duration::from_secs(15)), Some(Duration::from_secs(45)));

        m.reset();
        assert_eq!(m.state(), ThreatState::Idle);
        assert_eq!(m.remaining(t0), None);
    }
}
