//! Metrics emitted by the bridge.
//!
//! Only the `metrics` facade is used here; installing a recorder and
//! exporter is the binary's job.

use metrics::counter;

/// Metric names.
pub mod names {
    pub const BROKER_MESSAGES_TOTAL: &str = "vigil_broker_messages_total";
    pub const RECORDS_PERSISTED_TOTAL: &str = "vigil_records_persisted_total";
    pub const RECORDS_FAILED_TOTAL: &str = "vigil_records_failed_total";
    pub const BROADCASTS_TOTAL: &str = "vigil_broadcasts_total";
    pub const DELIVERIES_DROPPED_TOTAL: &str = "vigil_deliveries_dropped_total";
    pub const COMMANDS_TOTAL: &str = "vigil_commands_total";
    pub const PUBLISH_FAILURES_TOTAL: &str = "vigil_publish_failures_total";
    pub const BROKER_DISCONNECTS_TOTAL: &str = "vigil_broker_disconnects_total";
}

/// Record a message received from the broker.
pub fn record_broker_message(topic: &str) {
    counter!(names::BROKER_MESSAGES_TOTAL, "topic" => topic.to_string()).increment(1);
}

/// Record the outcome of a store append.
pub fn record_persist(success: bool) {
    if success {
        counter!(names::RECORDS_PERSISTED_TOTAL).increment(1);
    } else {
        counter!(names::RECORDS_FAILED_TOTAL).increment(1);
    }
}

/// Record a broadcast and how many deliveries were dropped.
pub fn record_broadcast(dropped: usize) {
    counter!(names::BROADCASTS_TOTAL).increment(1);
    if dropped > 0 {
        counter!(names::DELIVERIES_DROPPED_TOTAL).increment(dropped as u64);
    }
}

/// Record a command outcome (`accepted` or a rejection code).
pub fn record_command(outcome: &str) {
    counter!(names::COMMANDS_TOTAL, "outcome" => outcome.to_string()).increment(1);
}

/// Record a publish the transport refused.
pub fn record_publish_failure() {
    counter!(names::PUBLISH_FAILURES_TOTAL).increment(1);
}

/// Record a broker disconnection.
pub fn record_broker_disconnect() {
    counter!(names::BROKER_DISCONNECTS_TOTAL).increment(1);
}
