//! Fire-and-forget alert dispatch

use std::future::Future;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::manager::{AlertChannel, AlertConfig, AlertThrottle};
use crate::mqtt::MqttDispatcher;
use crate::{AlertError, AlertMessage};

/// Delivers alert messages to the outside world
pub trait AlertDispatcher: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn notify(
        &self,
        alert: &AlertMessage,
    ) -> impl Future<Output = Result<(), AlertError>> + Send;
}

/// Writes alerts to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDispatcher;

impl AlertDispatcher for LogDispatcher {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn notify(&self, alert: &AlertMessage) -> Result<(), AlertError> {
        warn!(
            episode = alert.episode,
            distance_m = alert.distance_m,
            "{}: {}",
            alert.subject,
            alert.body
        );
        Ok(())
    }
}

/// The dispatcher selected by configuration
pub enum Dispatcher {
    Log(LogDispatcher),
    Mqtt(MqttDispatcher),
}

impl Dispatcher {
    /// Build the configured dispatcher. MQTT needs a running tokio runtime.
    pub fn from_config(config: &AlertConfig) -> Result<Self, AlertError> {
        match config.channel {
            AlertChannel::Log => Ok(Dispatcher::Log(LogDispatcher)),
            AlertChannel::Mqtt => Ok(Dispatcher::Mqtt(MqttDispatcher::connect(&config.mqtt)?)),
        }
    }
}

impl AlertDispatcher for Dispatcher {
    fn name(&self) -> &'static str {
        match self {
            Dispatcher::Log(d) => d.name(),
            Dispatcher::Mqtt(d) => d.name(),
        }
    }

    async fn notify(&self, alert: &AlertMessage) -> Result<(), AlertError> {
        match self {
            Dispatcher::Log(d) => d.notify(alert).await,
            Dispatcher::Mqtt(d) => d.notify(alert).await,
        }
    }
}

/// Outcome counters of a dispatch task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: usize,
    pub failed: usize,
    pub throttled: usize,
}

/// Handle used by producers; sending never blocks.
#[derive(Debug, Clone)]
pub struct AlertSender {
    tx: mpsc::UnboundedSender<AlertMessage>,
}

impl AlertSender {
    /// A sender plus the receiving end, for custom consumers
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AlertMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue an alert. Returns false if the dispatch task has stopped.
    pub fn send(&self, alert: AlertMessage) -> bool {
        match self.tx.send(alert) {
            Ok(()) => true,
            Err(_) => {
                warn!("Alert dropped: dispatcher is not running");
                false
            }
        }
    }
}

/// Spawn the dispatch task. It ends when every `AlertSender` is dropped.
pub fn spawn_dispatcher<D: AlertDispatcher>(
    dispatcher: D,
    config: &AlertConfig,
) -> (AlertSender, JoinHandle<DispatchStats>) {
    let (sender, rx) = AlertSender::channel();
    let throttle = AlertThrottle::new(config.max_alerts_per_hour);
    let handle = tokio::spawn(run_dispatcher(dispatcher, rx, throttle));
    (sender, handle)
}

async fn run_dispatcher<D: AlertDispatcher>(
    dispatcher: D,
    mut rx: mpsc::UnboundedReceiver<AlertMessage>,
    mut throttle: AlertThrottle,
) -> DispatchStats {
    info!("Alert dispatcher started ({})", dispatcher.name());
    let mut stats = DispatchStats::default();

    while let Some(alert) = rx.recv().await {
        if !throttle.allow(Instant::now()) {
            stats.throttled += 1;
            continue;
        }
        match dispatcher.notify(&alert).await {
            Ok(()) => {
                stats.delivered += 1;
                debug!("Alert for episode {} delivered", alert.episode);
            }
            Err(e) => {
                stats.failed += 1;
                warn!("Alert delivery via {} failed: {}", dispatcher.name(), e);
            }
        }
    }

    info!(
        "Alert dispatcher stopped: {} delivered, {} failed, {} throttled",
        stats.delivered, stats.failed, stats.throttled
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recording {
        seen: Arc<Mutex<Vec<u64>>>,
        fail: bool,
    }

    impl AlertDispatcher for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn notify(&self, alert: &AlertMessage) -> Result<(), AlertError> {
            self.seen.lock().unwrap().push(alert.episode);
            if self.fail {
                Err(AlertError::Publish("smtp relay refused".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn alert(episode: u64) -> AlertMessage {
        AlertMessage::proximity(0.5, 1.0, episode, Utc::now())
    }

    #[tokio::test]
    async fn test_alerts_delivered_in_order() {
        let recording = Recording::default();
        let (sender, handle) = spawn_dispatcher(recording.clone(), &AlertConfig::default());

        assert!(sender.send(alert(1)));
        assert!(sender.send(alert(2)));
        drop(sender);

        let stats = handle.await.unwrap();
        assert_eq!(stats.delivered, 2);
        assert_eq!(*recording.seen.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_failures_are_absorbed() {
        let recording = Recording {
            fail: true,
            ..Default::default()
        };
        let (sender, handle) = spawn_dispatcher(recording.clone(), &AlertConfig::default());

        sender.send(alert(1));
        sender.send(alert(2));
        drop(sender);

        let stats = handle.await.unwrap();
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.delivered, 0);
        assert_eq!(recording.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_throttle_applies() {
        let config = AlertConfig {
            max_alerts_per_hour: 1,
            ..Default::default()
        };
        let (sender, handle) = spawn_dispatcher(Recording::default(), &config);

        sender.send(alert(1));
        sender.send(alert(2));
        drop(sender);

        let stats = handle.await.unwrap();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.throttled, 1);
    }

    #[tokio::test]
    async fn test_send_after_dispatcher_stopped() {
        let (sender, handle) = spawn_dispatcher(LogDispatcher, &AlertConfig::default());
        handle.abort();
        let _ = handle.await;
        assert!(!sender.send(alert(1)));
    }

    #[tokio::test]
    async fn test_log_dispatcher_from_config() {
        let dispatcher = Dispatcher::from_config(&AlertConfig::default()).unwrap();
        assert_eq!(dispatcher.name(), "log");
        assert!(dispatcher.notify(&alert(1)).await.is_ok());
    }
}
