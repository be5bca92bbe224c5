//! MQTT alert publishing

use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::dispatcher::AlertDispatcher;
use crate::{AlertError, AlertMessage};

/// MQTT broker settings. Credentials are read from configuration or the
/// environment, never compiled in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker host
    pub broker_host: String,
    /// Broker port
    pub broker_port: u16,
    /// Client id
    pub client_id: String,
    /// Topic alerts are published to
    pub topic: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Keep-alive interval (seconds)
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            client_id: "proximity-guard".to_string(),
            topic: "proximity-guard/alerts".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 30,
        }
    }
}

impl MqttConfig {
    fn options(&self) -> Result<MqttOptions, AlertError> {
        if self.broker_host.is_empty() {
            return Err(AlertError::Config("MQTT broker host is empty".to_string()));
        }
        if self.topic.is_empty() {
            return Err(AlertError::Config("MQTT topic is empty".to_string()));
        }

        let mut options = MqttOptions::new(&self.client_id, &self.broker_host, self.broker_port);
        options.set_keep_alive(Duration::from_secs(self.keep_alive_secs.max(5)));
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => {
                options.set_credentials(user, pass);
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(AlertError::Config(
                    "MQTT username and password must be set together".to_string(),
                ));
            }
            (None, None) => {}
        }
        Ok(options)
    }
}

/// Publishes alerts as JSON
pub struct MqttDispatcher {
    client: AsyncClient,
    topic: String,
}

impl MqttDispatcher {
    /// Create the client and spawn its event loop. Must run inside a tokio runtime.
    pub fn connect(config: &MqttConfig) -> Result<Self, AlertError> {
        let options = config.options()?;
        let (client, mut eventloop) = AsyncClient::new(options, 10);

        // Spawn event loop handler
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(incoming)) => {
                        debug!("MQTT incoming: {:?}", incoming);
                    }
                    Err(e) => {
                        error!("MQTT error: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    _ => {}
                }
            }
        });

        info!(
            "MQTT alerts -> {}:{} topic {}",
            config.broker_host, config.broker_port, config.topic
        );
        Ok(Self {
            client,
            topic: config.topic.clone(),
        })
    }
}

impl AlertDispatcher for MqttDispatcher {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    async fn notify(&self, alert: &AlertMessage) -> Result<(), AlertError> {
        let payload =
            serde_json::to_vec(alert).map_err(|e| AlertError::Serialization(e.to_string()))?;

        // A full request queue (broker unreachable) fails the alert instead of waiting
        self.client
            .try_publish(&self.topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| AlertError::Publish(e.to_string()))
    }
}
