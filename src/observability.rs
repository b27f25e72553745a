use std::net::SocketAddr;

// ── Business metrics ────────────────────────────────────────────

/// Counter: reservations inserted (any initial status).
pub const RESERVATIONS_CREATED_TOTAL: &str = "rentd_reservations_created_total";

/// Counter: check-and-write attempts rejected by the conflict detector.
pub const CONFLICTS_TOTAL: &str = "rentd_conflicts_total";

/// Counter: lifecycle transitions. Labels: to.
pub const STATUS_TRANSITIONS_TOTAL: &str = "rentd_status_transitions_total";

/// Counter: extension settlements. Labels: outcome.
pub const EXTENSIONS_TOTAL: &str = "rentd_extensions_total";

/// Counter: rows permanently removed by the purge pipeline. Labels: model.
pub const PURGED_ROWS_TOTAL: &str = "rentd_purged_rows_total";

// ── Storage metrics ─────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "rentd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "rentd_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
