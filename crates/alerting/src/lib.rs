//! Alerting System
//!
//! Threat alert messages, hourly throttling, and a dispatch task that sends
//! alerts without ever blocking the producer.

mod dispatcher;
mod manager;
mod message;
mod mqtt;

pub use dispatcher::{
    spawn_dispatcher, AlertDispatcher, AlertSender, DispatchStats, Dispatcher, LogDispatcher,
};
pub use manager::{AlertConfig, AlertThrottle, AlertChannel};
pub use message::AlertMessage;
pub use mqtt::{MqttConfig, MqttDispatcher};

use thiserror::Error;

/// Alerting error types
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
