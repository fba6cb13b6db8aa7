//! Prometheus metrics for the SCADA collector (ambient addition, SPEC_FULL.md
//! §2). Grounded on the teacher's own `metrics.rs` (`lazy_static` + axum
//! `/metrics` pattern); names and labels are domain-specific to MC3E polling
//! and Oracle writing rather than the teacher's OPC-UA ingestion metrics.
//! The teacher ran a dedicated `MetricsServer` on its own port; here
//! `/metrics` is one route on the single combined router built in
//! `api::build_router`, so only the registry and the handler survive.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec,
    register_histogram, register_histogram_vec, Counter, CounterVec, Encoder, Gauge, GaugeVec,
    Histogram, HistogramVec, TextEncoder,
};

lazy_static! {
    /// Total number of polling cycles executed, by group.
    pub static ref POLLS_TOTAL: CounterVec = register_counter_vec!(
        "scada_polls_total",
        "Total number of polling cycles executed",
        &["plc_code", "group_name", "mode"]
    )
    .unwrap();

    /// Polling cycles that errored, by group.
    pub static ref POLL_ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "scada_poll_errors_total",
        "Total number of polling cycles that errored",
        &["plc_code", "group_name"]
    )
    .unwrap();

    /// Time to complete one polling cycle.
    pub static ref POLL_DURATION: HistogramVec = register_histogram_vec!(
        "scada_poll_duration_seconds",
        "Time taken to complete one polling cycle",
        &["plc_code", "group_name"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    )
    .unwrap();

    /// Active (checked out or idle) connections in a PLC's connection pool.
    pub static ref PLC_POOL_CONNECTIONS: GaugeVec = register_gauge_vec!(
        "scada_plc_pool_connections",
        "Connections currently held by a PLC's connection pool",
        &["plc_code", "state"]
    )
    .unwrap();

    /// Current number of buffered tag readings awaiting Oracle write.
    pub static ref BUFFER_SIZE: Gauge = register_gauge!(
        "scada_buffer_size",
        "Current number of buffered tag readings awaiting Oracle write"
    )
    .unwrap();

    /// Buffer overflow events (oldest reading discarded for lack of room).
    pub static ref BUFFER_OVERFLOW_TOTAL: Counter = register_counter!(
        "scada_buffer_overflow_total",
        "Total number of buffer overflow events"
    )
    .unwrap();

    /// Time to write one batch to Oracle.
    pub static ref ORACLE_WRITE_DURATION: Histogram = register_histogram!(
        "scada_oracle_write_duration_seconds",
        "Time taken to write one batch to Oracle",
        vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    )
    .unwrap();

    /// Oracle batch writes by outcome (success/failure).
    pub static ref ORACLE_WRITES_TOTAL: CounterVec = register_counter_vec!(
        "scada_oracle_writes_total",
        "Total number of Oracle batch writes by outcome",
        &["outcome"]
    )
    .unwrap();

    /// Currently connected WebSocket monitor clients, by endpoint.
    pub static ref WS_CLIENTS_CONNECTED: GaugeVec = register_gauge_vec!(
        "scada_ws_clients_connected",
        "Number of currently connected WebSocket monitor clients",
        &["endpoint"]
    )
    .unwrap();
}

pub async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
