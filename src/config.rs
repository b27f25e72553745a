use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Runtime settings, read from `RENTD_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Days a soft-deleted row is kept before the purge pipeline removes it.
    pub retention_days: i64,
    pub purge_interval: Duration,
    pub purge_dry_run: bool,
    /// WAL appends accumulated before the log is compacted.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            retention_days: 30,
            purge_interval: Duration::from_secs(3600),
            purge_dry_run: false,
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparsable values keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            lookup(key).and_then(|s| s.trim().parse().ok())
        }
        let defaults = Self::default();

        Self {
            data_dir: lookup("RENTD_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            retention_days: parsed(&lookup, "RENTD_RETENTION_DAYS")
                .filter(|d: &i64| *d > 0)
                .unwrap_or(defaults.retention_days),
            purge_interval: parsed(&lookup, "RENTD_PURGE_INTERVAL_SECS")
                .filter(|s: &u64| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.purge_interval),
            purge_dry_run: parsed(&lookup, "RENTD_PURGE_DRY_RUN").unwrap_or(defaults.purge_dry_run),
            compact_threshold: parsed(&lookup, "RENTD_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parsed(&lookup, "RENTD_METRICS_PORT"),
        }
    }

    pub fn reservations_wal(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }

    pub fn abandonment_wal(&self) -> PathBuf {
        self.data_dir.join("abandonment.wal")
    }
}
