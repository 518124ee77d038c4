//! Frame types for the Vigil realtime channel.
//!
//! Every frame is an envelope of an event name and an optional payload:
//! `{"event": "disarmAlarm", "data": {"password": "1234"}}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event names used on the realtime channel.
pub mod events {
    /// Client asks the device to disarm; payload `{ password }`.
    pub const DISARM_ALARM: &str = "disarmAlarm";
    /// Client asks the device to activate; no payload.
    pub const ACTIVATE_ALARM: &str = "activateAlarm";
    /// Server relay of broker events, confirmations and errors.
    pub const ALARM_NOTIFICATION: &str = "alarmNotification";
    /// Server handshake carrying the session id.
    pub const CONNECTED: &str = "connected";
}

/// A frame received from a client.
///
/// The event name is kept as free text so that unknown events reach the
/// command validator and are rejected observably instead of failing to decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientFrame {
    /// Event name.
    pub event: String,
    /// Optional event payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ClientFrame {
    /// Create a frame with an arbitrary event and payload.
    #[must_use]
    pub fn new(event: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Create a `disarmAlarm` frame.
    #[must_use]
    pub fn disarm(password: impl Into<String>) -> Self {
        Self::new(
            events::DISARM_ALARM,
            Some(serde_json::json!({ "password": password.into() })),
        )
    }

    /// Create an `activateAlarm` frame.
    #[must_use]
    pub fn activate() -> Self {
        Self::new(events::ACTIVATE_ALARM, None)
    }
}

/// Payload of an `alarmNotification` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// JSON-encoded (or raw text) message body.
    pub message: String,
    /// When the underlying event was observed.
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    /// Create a notification.
    #[must_use]
    pub fn new(message: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            message: message.into(),
            timestamp,
        }
    }

    /// Create an error-shaped notification.
    ///
    /// The message is `{"error": <code>}`; callers pass machine-readable codes only.
    #[must_use]
    pub fn error(code: &str) -> Self {
        let message = serde_json::json!({ "error": code }).to_string();
        Self::new(message, Utc::now())
    }

    /// Check whether this notification signals an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        serde_json::from_str::<Value>(&self.message)
            .ok()
            .and_then(|v| v.get("error").cloned())
            .is_some()
    }
}

/// A frame sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerFrame {
    /// Handshake sent once per connection.
    #[serde(rename = "connected")]
    Connected {
        /// Identifier of the new session.
        #[serde(rename = "sessionId")]
        session_id: String,
    },

    /// Broker event relay, command confirmation or error.
    #[serde(rename = "alarmNotification")]
    AlarmNotification(Notification),
}

impl ServerFrame {
    /// Get the event name.
    #[must_use]
    pub fn event(&self) -> &'static str {
        match self {
            ServerFrame::Connected { .. } => events::CONNECTED,
            ServerFrame::AlarmNotification(_) => events::ALARM_NOTIFICATION,
        }
    }

    /// Create a `connected` frame.
    #[must_use]
    pub fn connected(session_id: impl Into<String>) -> Self {
        ServerFrame::Connected {
            session_id: session_id.into(),
        }
    }
}

impl From<Notification> for ServerFrame {
    fn from(notification: Notification) -> Self {
        ServerFrame::AlarmNotification(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_frame_from_json() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"event":"disarmAlarm","data":{"password":"1234"}}"#).unwrap();
        assert_eq!(frame, ClientFrame::disarm("1234"));
    }

    #[test]
    fn test_client_frame_without_data() {
        let frame: ClientFrame = serde_json::from_str(r#"{"event":"activateAlarm"}"#).unwrap();
        assert_eq!(frame, ClientFrame::activate());
    }

    #[test]
    fn test_notification_wire_shape() {
        let ts = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let frame = ServerFrame::from(Notification::new("sensor:triggered", ts));
        let value = serde_json::to_value(&frame).unwrap();

        assert_eq!(value["event"], "alarmNotification");
        assert_eq!(value["data"]["message"], "sensor:triggered");
        assert_eq!(value["data"]["timestamp"], "2024-05-01T12:00:00Z");
    }

    #[test]
    fn test_connected_wire_shape() {
        let value = serde_json::to_value(ServerFrame::connected("abc")).unwrap();
        assert_eq!(value["event"], "connected");
        assert_eq!(value["data"]["sessionId"], "abc");
    }

    #[test]
    fn test_error_notification() {
        let n = Notification::error("password_too_long");
        assert!(n.is_error());
        assert_eq!(n.message, r#"{"error":"password_too_long"}"#);

        assert!(!Notification::new("plain", Utc::now()).is_error());
    }
}
