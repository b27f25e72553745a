use chrono::{DateTime, Utc};
use tracing::debug;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

fn expired(deleted_at: Option<DateTime<Utc>>, cutoff: DateTime<Utc>) -> bool {
    deleted_at.is_some_and(|at| at < cutoff)
}

// Hard deletion. Normal business operations only ever soft-delete; these are
// reserved for the purge pipeline.
impl Engine {
    /// Extensions soft-deleted before `cutoff`.
    pub async fn purgeable_extensions(&self, cutoff: DateTime<Utc>) -> Vec<Ulid> {
        let vehicles: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut ids = Vec::new();
        for vs in vehicles {
            let guard = vs.read().await;
            ids.extend(
                guard
                    .extensions
                    .iter()
                    .filter(|e| expired(e.deleted_at, cutoff))
                    .map(|e| e.id),
            );
        }
        ids
    }

    /// Reservations soft-deleted before `cutoff`.
    pub async fn purgeable_reservations(&self, cutoff: DateTime<Utc>) -> Vec<Ulid> {
        let vehicles: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut ids = Vec::new();
        for vs in vehicles {
            let guard = vs.read().await;
            ids.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| expired(r.deleted_at, cutoff))
                    .map(|r| r.id),
            );
        }
        ids
    }

    pub async fn purge_extension(&self, id: Ulid, cutoff: DateTime<Utc>) -> Result<(), EngineError> {
        let mut txn = self.begin_for_extension(id).await?;
        let extension = txn.extension(id).ok_or(EngineError::NotFound(id))?;
        if !expired(extension.deleted_at, cutoff) {
            return Err(EngineError::Validation("extension is not past retention"));
        }
        let event = Event::ExtensionPurged {
            id,
            vehicle_id: txn.id,
        };
        self.persist_and_apply(&mut txn, &event).await?;
        debug!(extension = %id, "extension purged");
        Ok(())
    }

    /// Remove a reservation row for good. Its extensions must be purged first.
    pub async fn purge_reservation(&self, id: Ulid, cutoff: DateTime<Utc>) -> Result<(), EngineError> {
        let mut txn = self.begin_for_reservation(id).await?;
        let reservation = txn.reservation(id).ok_or(EngineError::NotFound(id))?;
        if !expired(reservation.deleted_at, cutoff) {
            return Err(EngineError::Validation("reservation is not past retention"));
        }
        if txn.extensions_of(id).next().is_some() {
            return Err(EngineError::HasDependents(id));
        }
        let event = Event::ReservationPurged {
            id,
            vehicle_id: txn.id,
        };
        self.persist_and_apply(&mut txn, &event).await?;
        debug!(reservation = %id, "reservation purged");
        // nothing left to announce for this vehicle
        if txn.reservations.is_empty() && txn.extensions.is_empty() {
            self.notify.remove(&txn.id);
        }
        Ok(())
    }
}
