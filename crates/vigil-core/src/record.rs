//! Event records persisted for every inbound broker message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of a stored record, assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub Uuid);

impl RecordId {
    /// Generate a new random record ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A normalized record that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    /// Canonical text of the event.
    pub payload: String,
    /// When the bridge normalized the message.
    pub received_at: DateTime<Utc>,
}

impl NewRecord {
    /// Attach a store-assigned identity.
    #[must_use]
    pub fn with_id(self, id: RecordId) -> EventRecord {
        EventRecord {
            id,
            payload: self.payload,
            received_at: self.received_at,
        }
    }
}

/// A stored event record. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    /// Store-assigned identity.
    pub id: RecordId,
    /// Canonical text of the event.
    pub payload: String,
    /// When the bridge normalized the message.
    pub received_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_wire_shape() {
        let record = NewRecord {
            payload: "sensor:triggered".to_string(),
            received_at: Utc::now(),
        }
        .with_id(RecordId::generate());

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["payload"], "sensor:triggered");
        assert!(value["id"].is_string());
        assert!(value["receivedAt"].is_string());
    }

    #[test]
    fn test_unique_record_ids() {
        assert_ne!(RecordId::generate(), RecordId::generate());
    }
}
