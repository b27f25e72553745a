use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::engine::Engine;
use crate::purge::PurgePipeline;

/// Background task that periodically runs the retention pipeline.
pub async fn run_purger(
    pipeline: Arc<PurgePipeline>,
    retention_days: i64,
    every: Duration,
    dry_run: bool,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        match pipeline.run(retention_days, dry_run).await {
            Ok(report) if report.total() > 0 || !report.errors.is_empty() => {
                info!(
                    purged = report.total(),
                    errors = report.errors.len(),
                    dry_run,
                    "scheduled purge"
                );
            }
            Ok(_) => debug!("scheduled purge: nothing to do"),
            Err(e) => error!("scheduled purge failed: {e}"),
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulated.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        if engine.wal_appends_since_compact().await < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("WAL compacted"),
            Err(e) => error!("WAL compaction failed: {e}"),
        }
    }
}
