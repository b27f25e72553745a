//! Retention pipeline: permanently removes soft-deleted rows whose
//! `deleted_at` is older than the retention window, children before parents.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};

/// Every model the pipeline knows about, in deletion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum PurgeModel {
    Documents,
    Reviews,
    Maintenance,
    Invoices,
    Extensions,
    Reservations,
    Vehicles,
    Users,
}

impl PurgeModel {
    pub const ORDER: [PurgeModel; 8] = [
        PurgeModel::Documents,
        PurgeModel::Reviews,
        PurgeModel::Maintenance,
        PurgeModel::Invoices,
        PurgeModel::Extensions,
        PurgeModel::Reservations,
        PurgeModel::Vehicles,
        PurgeModel::Users,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PurgeModel::Documents => "documents",
            PurgeModel::Reviews => "reviews",
            PurgeModel::Maintenance => "maintenance",
            PurgeModel::Invoices => "invoices",
            PurgeModel::Extensions => "extensions",
            PurgeModel::Reservations => "reservations",
            PurgeModel::Vehicles => "vehicles",
            PurgeModel::Users => "users",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PurgeError {
    /// The store could not even be listed; nothing was deleted for this model
    /// or any model after it.
    #[error("purge of {model:?} aborted: {reason}")]
    Fatal { model: PurgeModel, reason: String },
    #[error("retention window must be a positive, representable number of days, got {0}")]
    InvalidRetention(i64),
}

/// One storage model's rows as seen by the pipeline.
#[async_trait]
pub trait PurgeTarget: Send + Sync {
    fn model(&self) -> PurgeModel;

    /// Ids of rows soft-deleted before `cutoff`. An error aborts the run.
    async fn collect(&self, cutoff: DateTime<Utc>) -> Result<Vec<Ulid>, String>;

    /// Permanently delete one row. An error is recorded and the run goes on.
    async fn purge(&self, id: Ulid, cutoff: DateTime<Utc>) -> Result<(), String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    pub model: PurgeModel,
    pub id: Ulid,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub cutoff: DateTime<Utc>,
    pub dry_run: bool,
    /// Rows deleted per model, or rows that would be deleted in a dry run.
    pub counts: BTreeMap<PurgeModel, usize>,
    pub errors: Vec<RowError>,
}

impl PurgeReport {
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

pub struct PurgePipeline {
    targets: Vec<Arc<dyn PurgeTarget>>,
}

impl PurgePipeline {
    /// Pipeline over the engine's own models (extensions, reservations).
    pub fn for_engine(engine: Arc<Engine>) -> Self {
        Self {
            targets: vec![
                Arc::new(ExtensionRows(engine.clone())),
                Arc::new(ReservationRows(engine)),
            ],
        }
    }

    /// Register the rows of an externally owned model (documents, invoices...).
    pub fn with_target(mut self, target: Arc<dyn PurgeTarget>) -> Self {
        self.targets.push(target);
        self
    }

    pub fn models(&self) -> Vec<PurgeModel> {
        let mut models: Vec<_> = self.targets.iter().map(|t| t.model()).collect();
        models.sort();
        models
    }

    pub async fn run(&self, retention_days: i64, dry_run: bool) -> Result<PurgeReport, PurgeError> {
        if retention_days <= 0 {
            return Err(PurgeError::InvalidRetention(retention_days));
        }
        let cutoff = Duration::try_days(retention_days)
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .ok_or(PurgeError::InvalidRetention(retention_days))?;
        self.run_with_cutoff(cutoff, dry_run).await
    }

    /// Run every registered target in dependency order against a fixed cutoff.
    pub async fn run_with_cutoff(
        &self,
        cutoff: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<PurgeReport, PurgeError> {
        let mut report = PurgeReport {
            cutoff,
            dry_run,
            counts: BTreeMap::new(),
            errors: Vec::new(),
        };

        for model in PurgeModel::ORDER {
            for target in self.targets.iter().filter(|t| t.model() == model) {
                let ids = target
                    .collect(cutoff)
                    .await
                    .map_err(|reason| PurgeError::Fatal { model, reason })?;

                let mut purged = 0usize;
                if dry_run {
                    purged = ids.len();
                } else {
                    for id in ids {
                        match target.purge(id, cutoff).await {
                            Ok(()) => purged += 1,
                            Err(error) => {
                                warn!(model = model.as_str(), %id, "purge row failed: {error}");
                                report.errors.push(RowError { model, id, error });
                            }
                        }
                    }
                    metrics::counter!(
                        crate::observability::PURGED_ROWS_TOTAL,
                        "model" => model.as_str()
                    )
                    .increment(purged as u64);
                }
                *report.counts.entry(model).or_default() += purged;
            }
        }

        info!(
            dry_run,
            total = report.total(),
            errors = report.errors.len(),
            "purge finished for rows deleted before {cutoff}"
        );
        Ok(report)
    }
}

struct ExtensionRows(Arc<Engine>);

#[async_trait]
impl PurgeTarget for ExtensionRows {
    fn model(&self) -> PurgeModel {
        PurgeModel::Extensions
    }

    async fn collect(&self, cutoff: DateTime<Utc>) -> Result<Vec<Ulid>, String> {
        Ok(self.0.purgeable_extensions(cutoff).await)
    }

    async fn purge(&self, id: Ulid, cutoff: DateTime<Utc>) -> Result<(), String> {
        self.0
            .purge_extension(id, cutoff)
            .await
            .map_err(|e: EngineError| format!("{}: {e}", e.label()))
    }
}

struct ReservationRows(Arc<Engine>);

#[async_trait]
impl PurgeTarget for ReservationRows {
    fn model(&self) -> PurgeModel {
        PurgeModel::Reservations
    }

    async fn collect(&self, cutoff: DateTime<Utc>) -> Result<Vec<Ulid>, String> {
        Ok(self.0.purgeable_reservations(cutoff).await)
    }

    async fn purge(&self, id: Ulid, cutoff: DateTime<Utc>) -> Result<(), String> {
        self.0
            .purge_reservation(id, cutoff)
            .await
            .map_err(|e: EngineError| format!("{}: {e}", e.label()))
    }
}
