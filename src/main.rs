use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use rentd::abandonment::AbandonmentTracker;
use rentd::config::Config;
use rentd::engine::Engine;
use rentd::notify::NotifyHub;
use rentd::purge::PurgePipeline;
use rentd::reaper;

#[derive(Parser)]
#[command(name = "rentd", about = "Vehicle reservation engine")]
struct App {
    /// Overrides RENTD_DATA_DIR.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the store's background jobs (scheduled purge, WAL compaction).
    Serve,
    /// Run the retention pipeline once and print the report as JSON.
    Purge(PurgeArgs),
}

#[derive(Args)]
struct PurgeArgs {
    /// Overrides RENTD_RETENTION_DAYS.
    #[arg(long)]
    retention_days: Option<i64>,
    /// Count what would be deleted without deleting anything.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let app = App::parse();
    let mut config = Config::from_env();
    if let Some(dir) = app.data_dir {
        config.data_dir = dir;
    }
    std::fs::create_dir_all(&config.data_dir)?;

    let engine = Arc::new(Engine::new(
        config.reservations_wal(),
        Arc::new(NotifyHub::new()),
    )?);
    let pipeline = Arc::new(PurgePipeline::for_engine(engine.clone()));

    match app.command {
        Command::Purge(args) => {
            let retention_days = args.retention_days.unwrap_or(config.retention_days);
            let report = pipeline.run(retention_days, args.dry_run).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.errors.is_empty() {
                std::process::exit(2);
            }
            Ok(())
        }
        Command::Serve => serve(config, engine, pipeline).await,
    }
}

async fn serve(
    config: Config,
    engine: Arc<Engine>,
    pipeline: Arc<PurgePipeline>,
) -> Result<(), Box<dyn std::error::Error>> {
    rentd::observability::init(config.metrics_port)?;
    let abandoned = AbandonmentTracker::open(&config.abandonment_wal())?;

    info!("rentd started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  retention: {} days", config.retention_days);
    info!(
        "  purge: every {}s{}",
        config.purge_interval.as_secs(),
        if config.purge_dry_run { " (dry run)" } else { "" }
    );
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );
    info!("  abandoned checkouts awaiting recovery: {}", abandoned.pending().len());

    let purger = tokio::spawn(reaper::run_purger(
        pipeline,
        config.retention_days,
        config.purge_interval,
        config.purge_dry_run,
    ));
    let compactor = tokio::spawn(reaper::run_compactor(
        engine.clone(),
        config.compact_threshold,
    ));

    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }

    info!("shutdown signal received");
    purger.abort();
    compactor.abort();
    if engine.wal_appends_since_compact().await > 0 {
        engine.compact_wal().await?;
    }
    info!("rentd stopped");
    Ok(())
}
