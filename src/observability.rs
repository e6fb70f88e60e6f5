use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total engine operations. Labels: op, status.
pub const OPS_TOTAL: &str = "bookline_ops_total";

/// Histogram: engine operation latency in seconds. Labels: op.
pub const OP_DURATION_SECONDS: &str = "bookline_op_duration_seconds";

/// Counter: reservations refused because the slot was taken or closed.
pub const RESERVE_CONFLICTS_TOTAL: &str = "bookline_reserve_conflicts_total";

/// Histogram: candidate slots returned per generation call.
pub const SLOTS_RETURNED: &str = "bookline_slots_returned";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: number of active providers (loaded engines).
pub const PROVIDERS_ACTIVE: &str = "bookline_providers_active";

/// Counter: past blocked periods removed by the sweeper.
pub const BLOCKED_SWEPT_TOTAL: &str = "bookline_blocked_swept_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "bookline_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "bookline_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if `port` is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
