//! Broker topic names.
//!
//! Both the inbound relay and the outbound command path read these constants;
//! nothing else in the workspace spells a topic name.

/// Inbound device and sensor events. Payloads are opaque bytes.
pub const STATUS_TOPIC: &str = "status";

/// Outbound device commands, see [`crate::ControlPayload`].
pub const CONTROL_TOPIC: &str = "control";

/// Topics the broker adapter subscribes to on every (re)connection.
pub const SUBSCRIBED_TOPICS: [&str; 2] = [STATUS_TOPIC, CONTROL_TOPIC];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribed_topics() {
        assert!(SUBSCRIBED_TOPICS.contains(&STATUS_TOPIC));
        assert!(SUBSCRIBED_TOPICS.contains(&CONTROL_TOPIC));
    }
}
