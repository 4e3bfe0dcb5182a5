//! Metrics collection and export for Parley.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use parley_core::{DeliveryReport, RouterStats};
use parley_protocol::EventKind;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "parley_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "parley_connections_active";
    pub const USERS_ONLINE: &str = "parley_users_online";
    pub const ROOMS_ACTIVE: &str = "parley_rooms_active";
    pub const EVENTS_TOTAL: &str = "parley_events_total";
    pub const DELIVERIES_TOTAL: &str = "parley_deliveries_total";
    pub const DELIVERIES_SKIPPED: &str = "parley_deliveries_skipped_total";
    pub const HANDSHAKES_REJECTED: &str = "parley_handshakes_rejected_total";
    pub const LATENCY_SECONDS: &str = "parley_event_latency_seconds";
    pub const ERRORS_TOTAL: &str = "parley_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_gauge!(names::USERS_ONLINE, "Users with at least one live connection");
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Rooms with at least one subscriber");
    metrics::describe_counter!(names::EVENTS_TOTAL, "Inbound events by kind");
    metrics::describe_counter!(names::DELIVERIES_TOTAL, "Outbound events queued");
    metrics::describe_counter!(
        names::DELIVERIES_SKIPPED,
        "Outbound events dropped for unreachable connections"
    );
    metrics::describe_counter!(
        names::HANDSHAKES_REJECTED,
        "WebSocket handshakes refused before upgrade"
    );
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Inbound event handling latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record an inbound event.
pub fn record_event(kind: EventKind) {
    counter!(names::EVENTS_TOTAL, "event" => kind.as_str()).increment(1);
}

/// Record the outcome of a fan-out.
pub fn record_delivery(report: DeliveryReport) {
    counter!(names::DELIVERIES_TOTAL).increment(report.delivered as u64);
    if report.skipped > 0 {
        counter!(names::DELIVERIES_SKIPPED).increment(report.skipped as u64);
    }
}

/// Record event handling latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Record a refused handshake.
pub fn record_rejected_handshake(reason: &'static str) {
    counter!(names::HANDSHAKES_REJECTED, "reason" => reason).increment(1);
}

/// Update the router gauges.
pub fn record_stats(stats: &RouterStats) {
    gauge!(names::USERS_ONLINE).set(stats.online_users as f64);
    gauge!(names::ROOMS_ACTIVE).set(stats.room_count as f64);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
