//! Contract between the bridge and the publish/subscribe transport.
//!
//! The transport itself lives outside this crate. Inbound traffic and
//! connection lifecycle arrive as [`BrokerEvent`]s on a channel; outbound
//! commands go through [`Broker::publish`].

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Delivery guarantee level for a publish or subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum QoS {
    /// Fire and forget.
    AtMostOnce = 0,
    /// Delivered one or more times.
    #[default]
    AtLeastOnce = 1,
    /// Delivered exactly once.
    ExactlyOnce = 2,
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> u8 {
        qos as u8
    }
}

impl TryFrom<u8> for QoS {
    type Error = BrokerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(BrokerError::InvalidQoS(other)),
        }
    }
}

/// Broker errors.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The transport refused the publish.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// The transport refused the subscription.
    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    /// The broker client has shut down.
    #[error("Broker client closed")]
    Closed,

    /// Unsupported quality-of-service level.
    #[error("Invalid QoS level: {0}")]
    InvalidQoS(u8),
}

/// Something that happened on the broker connection.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    /// A (re)connection completed and subscriptions were requested.
    Connected,
    /// The connection dropped; the adapter keeps retrying.
    Disconnected {
        /// Transport error description.
        reason: String,
    },
    /// The broker refused a subscription.
    SubscribeFailed {
        /// Topic that could not be subscribed.
        topic: String,
    },
    /// A message arrived on a subscribed topic.
    Message {
        /// Topic the message arrived on.
        topic: String,
        /// Raw payload.
        payload: Bytes,
    },
}

/// Publishing side of the broker transport.
///
/// Implementations must not block on broker acknowledgement: `publish`
/// returns once the transport has queued or refused the message. `Ok` means
/// queued, not delivered.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish a payload to a topic.
    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS) -> Result<(), BrokerError>;
}
