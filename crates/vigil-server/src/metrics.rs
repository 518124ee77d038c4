//! Prometheus metrics for the Vigil server.
//!
//! Client-facing series live here; bridge and hub series are recorded by
//! `vigil_core::telemetry` and only described here so they carry help text.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use vigil_core::telemetry::names as bridge;

/// Metric names.
pub mod names {
    pub const SESSIONS_OPENED: &str = "vigil_sessions_opened_total";
    pub const SESSIONS_ACTIVE: &str = "vigil_sessions_active";
    pub const FRAMES_TOTAL: &str = "vigil_frames_total";
    pub const FRAME_BYTES: &str = "vigil_frame_bytes_total";
    pub const INBOUND_SECONDS: &str = "vigil_inbound_handling_seconds";
    pub const ERRORS_TOTAL: &str = "vigil_errors_total";
}

/// Which way a client frame travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to server.
    Inbound,
    /// Server to client.
    Outbound,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Register help text for every series the server exports.
pub fn init_metrics() {
    let counters = [
        (names::SESSIONS_OPENED, "WebSocket sessions opened since start"),
        (names::FRAMES_TOTAL, "Client frames by direction"),
        (names::FRAME_BYTES, "Client frame bytes by direction"),
        (names::ERRORS_TOTAL, "Server errors by kind"),
        (bridge::BROKER_MESSAGES_TOTAL, "Messages received from the broker"),
        (bridge::RECORDS_PERSISTED_TOTAL, "Records stored"),
        (bridge::RECORDS_FAILED_TOTAL, "Records the store refused"),
        (bridge::BROADCASTS_TOTAL, "Broadcasts to all sessions"),
        (
            bridge::DELIVERIES_DROPPED_TOTAL,
            "Frames dropped because a session outbox was full",
        ),
        (bridge::COMMANDS_TOTAL, "Commands by outcome"),
        (
            bridge::PUBLISH_FAILURES_TOTAL,
            "Commands the broker client refused",
        ),
        (bridge::BROKER_DISCONNECTS_TOTAL, "Broker connection errors"),
    ];
    for (name, help) in counters {
        metrics::describe_counter!(name, help);
    }

    metrics::describe_gauge!(names::SESSIONS_ACTIVE, "Currently connected sessions");
    metrics::describe_histogram!(
        names::INBOUND_SECONDS,
        "Time to decode and submit one inbound frame"
    );

    info!("Metrics initialized");
}

/// Install the Prometheus exporter on `0.0.0.0:port`.
///
/// # Errors
///
/// Returns an error if the exporter cannot bind or is already installed.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Count one client frame.
pub fn record_frame(direction: Direction, bytes: usize) {
    let label = direction.label();
    counter!(names::FRAMES_TOTAL, "direction" => label).increment(1);
    counter!(names::FRAME_BYTES, "direction" => label).increment(bytes as u64);
}

/// Record inbound frame handling time.
pub fn record_inbound_latency(seconds: f64) {
    histogram!(names::INBOUND_SECONDS).record(seconds);
}

/// Count an error of the given kind.
pub fn record_error(kind: &'static str) {
    counter!(names::ERRORS_TOTAL, "kind" => kind).increment(1);
}

/// Tracks one live session in the session gauges.
pub struct SessionMetricsGuard(());

impl SessionMetricsGuard {
    /// Record an opened session; the drop records its close.
    #[must_use]
    pub fn open() -> Self {
        counter!(names::SESSIONS_OPENED).increment(1);
        gauge!(names::SESSIONS_ACTIVE).increment(1.0);
        Self(())
    }
}

impl Drop for SessionMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::SESSIONS_ACTIVE).decrement(1.0);
    }
}
