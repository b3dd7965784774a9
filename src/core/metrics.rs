// src/core/metrics.rs

//! Defines and registers Prometheus metrics for the bridge.
//!
//! Metrics are process-wide and shared by every client in the process.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, TextEncoder, register_counter, register_counter_vec,
    register_gauge, register_histogram,
};

lazy_static! {
    // --- Gauges ---
    /// The number of clients currently open in this process.
    pub static ref OPEN_CLIENTS: Gauge =
        register_gauge!("spinel_bridge_open_clients", "Number of currently open clients.").unwrap();
    /// Requests accepted but not yet completed, across all clients.
    pub static ref PENDING_REQUESTS: Gauge =
        register_gauge!("spinel_bridge_pending_requests", "Number of requests awaiting completion.").unwrap();

    // --- Counters ---
    pub static ref REQUESTS_SUBMITTED_TOTAL: Counter =
        register_counter!("spinel_bridge_requests_submitted_total", "Total number of requests accepted for transmission.").unwrap();
    /// Submissions refused before registration, labeled by error kind.
    pub static ref REQUESTS_REJECTED_TOTAL: CounterVec =
        register_counter_vec!("spinel_bridge_requests_rejected_total", "Total number of submissions rejected immediately, labeled by kind.", &["kind"]).unwrap();
    /// Completions delivered, labeled `success` or by error kind.
    pub static ref COMPLETIONS_TOTAL: CounterVec =
        register_counter_vec!("spinel_bridge_completions_total", "Total number of completions delivered, labeled by outcome.", &["outcome"]).unwrap();
    pub static ref CALLBACK_PANICS_TOTAL: Counter =
        register_counter!("spinel_bridge_callback_panics_total", "Total number of host callbacks that panicked.").unwrap();

    // --- Histograms ---
    /// Time from acceptance to completion.
    pub static ref REQUEST_LATENCY_SECONDS: Histogram =
        register_histogram!("spinel_bridge_request_latency_seconds", "Latency from submission to completion in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap_or_default()
}
