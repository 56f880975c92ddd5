// src/core/metrics.rs

//! Defines and registers Prometheus metrics for the engine.
//!
//! Metrics are registered once per process through `lazy_static`, so several
//! engines in the same process share the same counters.

use lazy_static::lazy_static;
use prometheus::{Counter, Gauge, TextEncoder, register_counter, register_gauge};

lazy_static! {
    // --- Gauges ---
    /// The number of connections currently registered (connected or closing).
    pub static ref OPEN_CONNECTIONS: Gauge =
        register_gauge!("tcpbridge_open_connections", "Number of currently open connections.").unwrap();
    /// The number of keep-send tasks currently running.
    pub static ref ACTIVE_SEND_TASKS: Gauge =
        register_gauge!("tcpbridge_active_send_tasks", "Number of running keep-send tasks.").unwrap();

    // --- Counters ---
    pub static ref CONNECTIONS_OPENED_TOTAL: Counter =
        register_counter!("tcpbridge_connections_opened_total", "Total number of successful connects.").unwrap();
    pub static ref CONNECT_FAILURES_TOTAL: Counter =
        register_counter!("tcpbridge_connect_failures_total", "Total number of failed connect attempts.").unwrap();
    pub static ref BYTES_SENT_TOTAL: Counter =
        register_counter!("tcpbridge_bytes_sent_total", "Total number of payload bytes written.").unwrap();
    pub static ref BYTES_RECEIVED_TOTAL: Counter =
        register_counter!("tcpbridge_bytes_received_total", "Total number of bytes read from peers.").unwrap();
    pub static ref EVENTS_DISPATCHED_TOTAL: Counter =
        register_counter!("tcpbridge_events_dispatched_total", "Total number of events delivered to listeners.").unwrap();
}

/// Renders every registered metric in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
