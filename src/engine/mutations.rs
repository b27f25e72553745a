use chrono::Utc;
use tokio::sync::oneshot;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, validate_draft};
use super::{Engine, EngineError, WalCommand};

/// A reservation business logic may act on: present and not soft-deleted.
pub(super) fn live_reservation(vs: &VehicleState, id: Ulid) -> Result<&Reservation, EngineError> {
    vs.reservation(id)
        .filter(|r| !r.is_deleted())
        .ok_or(EngineError::NotFound(id))
}

fn record_transition(status: ReservationStatus) {
    metrics::counter!(
        crate::observability::STATUS_TRANSITIONS_TOTAL,
        "to" => status.as_str()
    )
    .increment(1);
}

impl Engine {
    /// Check the draft's dates against the vehicle's CONFIRMED/ACTIVE
    /// reservations and insert it, as one unit under the vehicle lock.
    pub async fn create_reservation(
        &self,
        draft: ReservationDraft,
    ) -> Result<Reservation, EngineError> {
        validate_draft(&draft)?;

        let mut txn = self.begin(draft.vehicle_id).await;
        if txn.reservations.len() >= MAX_RESERVATIONS_PER_VEHICLE {
            return Err(EngineError::LimitExceeded("too many reservations on vehicle"));
        }
        check_no_conflict(&txn, &draft.range, None)?;
        let total_amount = draft
            .total_amount()
            .ok_or(EngineError::LimitExceeded("total amount overflows"))?;

        let now = Utc::now();
        let status = if draft.confirm_immediately {
            ReservationStatus::Confirmed
        } else {
            ReservationStatus::Pending
        };
        let reservation = Reservation {
            id: Ulid::new(),
            vehicle_id: draft.vehicle_id,
            renter_id: draft.renter_id,
            range: draft.range,
            status,
            daily_rate: draft.daily_rate,
            total_amount,
            extras: draft.extras,
            pickup_location: draft.pickup_location,
            dropoff_location: draft.dropoff_location,
            deleted_at: None,
            deleted_by: None,
            created_at: now,
            updated_at: now,
        };

        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
        };
        self.persist_and_apply(&mut txn, &event).await?;
        metrics::counter!(crate::observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        info!(
            reservation = %reservation.id,
            vehicle = %reservation.vehicle_id,
            status = %reservation.status,
            "reservation created for {}..={}",
            reservation.range.start,
            reservation.range.end
        );
        Ok(reservation)
    }

    /// PENDING → CONFIRMED. Re-runs the conflict check under the vehicle
    /// lock, since other PENDING bookings may have been confirmed meanwhile.
    /// Confirming an already CONFIRMED reservation returns it unchanged.
    pub async fn confirm_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let mut txn = self.begin_for_reservation(id).await?;
        let current = live_reservation(&txn, id)?;
        match current.status {
            ReservationStatus::Pending => {}
            ReservationStatus::Confirmed => return Ok(current.clone()),
            status @ (ReservationStatus::Completed | ReservationStatus::Cancelled) => {
                return Err(EngineError::AlreadyTerminal { id, status });
            }
            status => return Err(EngineError::InvalidState { id, status }),
        }
        let range = current.range;
        check_no_conflict(&txn, &range, Some(id))?;
        self.set_status(&mut txn, id, ReservationStatus::Confirmed)
            .await
    }

    /// CONFIRMED → ACTIVE: the vehicle was handed over.
    pub async fn activate_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.transition(id, ReservationStatus::Active).await
    }

    /// ACTIVE → COMPLETED: the vehicle was returned.
    pub async fn complete_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.transition(id, ReservationStatus::Completed).await
    }

    /// Cancel a PENDING or CONFIRMED reservation, freeing its dates at once.
    /// Cancelling twice is a no-op returning the current state.
    pub async fn cancel_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let mut txn = self.begin_for_reservation(id).await?;
        let current = live_reservation(&txn, id)?;
        match current.status {
            ReservationStatus::Cancelled => Ok(current.clone()),
            ReservationStatus::Pending | ReservationStatus::Confirmed => {
                self.set_status(&mut txn, id, ReservationStatus::Cancelled)
                    .await
            }
            status => Err(EngineError::InvalidState { id, status }),
        }
    }

    /// Moves along a lifecycle edge that can only shrink or close the
    /// reservation's claim, so no conflict check is needed.
    async fn transition(
        &self,
        id: Ulid,
        next: ReservationStatus,
    ) -> Result<Reservation, EngineError> {
        let mut txn = self.begin_for_reservation(id).await?;
        let status = live_reservation(&txn, id)?.status;
        if !status.can_transition_to(next) {
            return Err(EngineError::InvalidState { id, status });
        }
        self.set_status(&mut txn, id, next).await
    }

    async fn set_status(
        &self,
        txn: &mut super::VehicleTxn,
        id: Ulid,
        status: ReservationStatus,
    ) -> Result<Reservation, EngineError> {
        let event = Event::StatusChanged {
            id,
            vehicle_id: txn.id,
            status,
            at: Utc::now(),
        };
        self.persist_and_apply(txn, &event).await?;
        record_transition(status);
        info!(reservation = %id, vehicle = %txn.id, "reservation is now {status}");
        live_reservation(txn, id).cloned()
    }

    /// Mark a reservation (and its extensions) deleted for audit. The row keeps
    /// its last status but drops out of conflict checks and listings.
    pub async fn soft_delete_reservation(
        &self,
        id: Ulid,
        deleted_by: &str,
    ) -> Result<Reservation, EngineError> {
        if deleted_by.len() > MAX_DELETED_BY_LEN {
            return Err(EngineError::LimitExceeded("deleted_by too long"));
        }
        let mut txn = self.begin_for_reservation(id).await?;
        let current = txn.reservation(id).ok_or(EngineError::NotFound(id))?;
        if current.is_deleted() {
            return Ok(current.clone());
        }
        let event = Event::ReservationDeleted {
            id,
            vehicle_id: txn.id,
            deleted_by: deleted_by.to_string(),
            at: Utc::now(),
        };
        self.persist_and_apply(&mut txn, &event).await?;
        info!(reservation = %id, by = deleted_by, "reservation soft-deleted");
        txn.reservation(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate
    /// the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;

        let vehicles: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::new();
        for vs in vehicles {
            let guard = vs.read().await;
            for reservation in &guard.reservations {
                events.push(Event::ReservationCreated {
                    reservation: reservation.clone(),
                });
            }
            for extension in &guard.extensions {
                events.push(Event::ExtensionRequested {
                    vehicle_id: guard.id,
                    extension: extension.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
