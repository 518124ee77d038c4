//! Payloads published on the `control` topic.

use serde::{Deserialize, Serialize};

/// Action name carried by an activation command.
pub const ACTIVATE_ACTION: &str = "activate";

/// A command document for the controlled device.
///
/// Serialized without a tag, so the device sees either
/// `{"password":"..."}` or `{"action":"activate"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlPayload {
    /// Disarm with the supplied password.
    Disarm {
        /// Credential forwarded to the device, which makes the unlock decision.
        password: String,
    },
    /// A parameterless action such as `activate`.
    Action {
        /// Action name.
        action: String,
    },
}

impl ControlPayload {
    /// Create a disarm payload.
    #[must_use]
    pub fn disarm(password: impl Into<String>) -> Self {
        ControlPayload::Disarm {
            password: password.into(),
        }
    }

    /// Create the activation payload.
    #[must_use]
    pub fn activate() -> Self {
        ControlPayload::Action {
            action: ACTIVATE_ACTION.to_string(),
        }
    }

    /// Serialize to the JSON bytes published on the broker.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disarm_shape() {
        let bytes = ControlPayload::disarm("1234").to_bytes().unwrap();
        assert_eq!(bytes, br#"{"password":"1234"}"#);
    }

    #[test]
    fn test_activate_shape() {
        let bytes = ControlPayload::activate().to_bytes().unwrap();
        assert_eq!(bytes, br#"{"action":"activate"}"#);
    }
}
