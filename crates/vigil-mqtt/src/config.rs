//! Broker connection settings.

use rumqttc::MqttOptions;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use vigil_core::{BrokerError, QoS};

/// MQTT connection configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host name or address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Broker port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Client identifier presented to the broker.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Optional username.
    #[serde(default)]
    pub username: Option<String>,

    /// Optional password.
    #[serde(default)]
    pub password: Option<String>,

    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// Capacity of the outbound request queue.
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,

    /// Capacity of the inbound event channel handed to the bridge.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// First reconnect delay in milliseconds.
    #[serde(default = "default_reconnect_initial")]
    pub reconnect_initial_ms: u64,

    /// Reconnect delay ceiling in milliseconds.
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_ms: u64,

    /// QoS level for topic subscriptions (0, 1 or 2).
    #[serde(default = "default_subscribe_qos")]
    pub subscribe_qos: u8,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "vigil-bridge".to_string()
}

fn default_keep_alive() -> u64 {
    30
}

fn default_request_capacity() -> usize {
    64
}

fn default_event_buffer() -> usize {
    1024
}

fn default_reconnect_initial() -> u64 {
    500
}

fn default_reconnect_max() -> u64 {
    30_000
}

fn default_subscribe_qos() -> u8 {
    1
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id: default_client_id(),
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive(),
            request_capacity: default_request_capacity(),
            event_buffer: default_event_buffer(),
            reconnect_initial_ms: default_reconnect_initial(),
            reconnect_max_ms: default_reconnect_max(),
            subscribe_qos: default_subscribe_qos(),
        }
    }
}

impl fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("keep_alive_secs", &self.keep_alive_secs)
            .field("request_capacity", &self.request_capacity)
            .field("event_buffer", &self.event_buffer)
            .field("reconnect_initial_ms", &self.reconnect_initial_ms)
            .field("reconnect_max_ms", &self.reconnect_max_ms)
            .field("subscribe_qos", &self.subscribe_qos)
            .finish()
    }
}

impl MqttConfig {
    /// Build `rumqttc` options.
    #[must_use]
    pub fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        // rumqttc rejects keep-alives under five seconds.
        options.set_keep_alive(Duration::from_secs(self.keep_alive_secs.max(5)));
        options.set_clean_session(true);

        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            options.set_credentials(username, password);
        }

        options
    }

    /// Subscription QoS.
    ///
    /// # Errors
    ///
    /// Returns an error if `subscribe_qos` is not 0, 1 or 2.
    pub fn subscribe_qos(&self) -> Result<QoS, BrokerError> {
        QoS::try_from(self.subscribe_qos)
    }

    /// Broker address as `host:port`.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MqttConfig::default();
        assert_eq!(config.address(), "localhost:1883");
        assert_eq!(config.subscribe_qos().unwrap(), QoS::AtLeastOnce);
        assert_eq!(config.request_capacity, 64);
        assert_eq!(config.event_buffer, 1024);
    }

    #[test]
    fn test_options() {
        let config = MqttConfig {
            host: "broker.local".into(),
            port: 8883,
            keep_alive_secs: 1,
            ..Default::default()
        };
        let options = config.options();

        assert_eq!(options.broker_address(), ("broker.local".to_string(), 8883));
        assert_eq!(options.keep_alive(), Duration::from_secs(5));
        assert_eq!(options.client_id(), "vigil-bridge");
        assert!(options.clean_session());
    }

    #[test]
    fn test_invalid_qos() {
        let config = MqttConfig {
            subscribe_qos: 7,
            ..Default::default()
        };
        assert!(config.subscribe_qos().is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = MqttConfig {
            username: Some("bridge".into()),
            password: Some("hunter2".into()),
            ..Default::default()
        };
        assert!(!format!("{:?}", config).contains("hunter2"));
    }
}
