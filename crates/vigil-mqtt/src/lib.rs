//! # vigil-mqtt
//!
//! MQTT adapter for the Vigil bridge, built on `rumqttc`.
//!
//! [`connect`] returns two halves:
//!
//! - [`MqttBroker`] - implements [`vigil_core::Broker`] for outbound commands
//! - [`MqttConnection`] - drives the connection, re-subscribes after every
//!   (re)connect and forwards inbound traffic as [`vigil_core::BrokerEvent`]s
//!
//! ```rust,ignore
//! use vigil_mqtt::{connect, MqttConfig};
//!
//! let (broker, connection) = connect(MqttConfig::default(), &vigil_protocol::SUBSCRIBED_TOPICS);
//! let (tx, rx) = tokio::sync::mpsc::channel(1024);
//! tokio::spawn(connection.run(tx, shutdown.clone()));
//! ```

pub mod backoff;
pub mod client;
pub mod config;

pub use backoff::Backoff;
pub use client::{connect, MqttBroker, MqttConnection};
pub use config::MqttConfig;
