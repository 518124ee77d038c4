//! Normalization of raw broker payloads into canonical records.
//!
//! A payload is either structured (a JSON object or array) or raw text. Both
//! outcomes produce a record; normalization has no failure path.

use crate::record::NewRecord;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicI64, Ordering};

/// Outcome of interpreting a raw payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    /// The payload parsed as a JSON object or array.
    Structured(Value),
    /// The payload is kept verbatim.
    Raw(String),
}

impl Normalized {
    /// Interpret raw bytes.
    ///
    /// Bare JSON scalars such as `42` or `"on"` stay raw. Numbers inside
    /// structured payloads keep their original digits.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(raw) {
            Ok(value @ (Value::Object(_) | Value::Array(_))) => Normalized::Structured(value),
            _ => Normalized::Raw(String::from_utf8_lossy(raw).into_owned()),
        }
    }

    /// Render the canonical text form.
    ///
    /// Structured values are written compactly with object keys sorted, so
    /// equal documents always render identically.
    #[must_use]
    pub fn canonical(&self) -> String {
        match self {
            Normalized::Structured(value) => sort_keys(value).to_string(),
            Normalized::Raw(text) => text.clone(),
        }
    }

    /// Check whether the payload was structured.
    #[must_use]
    pub fn is_structured(&self) -> bool {
        matches!(self, Normalized::Structured(_))
    }
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let sorted: Map<String, Value> = entries
                .into_iter()
                .map(|(k, v)| (k.clone(), sort_keys(v)))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Produces records with strictly increasing `received_at` timestamps.
#[derive(Debug, Default)]
pub struct Normalizer {
    /// Last issued timestamp in nanoseconds since the epoch.
    last: AtomicI64,
}

impl Normalizer {
    /// Create a new normalizer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize one inbound message.
    #[must_use]
    pub fn normalize(&self, raw: &[u8]) -> NewRecord {
        NewRecord {
            payload: Normalized::parse(raw).canonical(),
            received_at: self.stamp(),
        }
    }

    /// Issue the next timestamp, never equal to or before the previous one.
    fn stamp(&self) -> DateTime<Utc> {
        let now = Utc::now().timestamp_nanos_opt();
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let next = match now {
                Some(n) if n > current => n,
                _ => current.saturating_add(1),
            };
            match self
                .last
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return Utc.timestamp_nanos(next),
                Err(actual) => current = actual,
            }
        }
    }
}
