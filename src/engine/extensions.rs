use chrono::{NaiveDate, Utc};
use tracing::info;
use ulid::Ulid;

use crate::model::*;

use super::conflict::{check_no_conflict, find_conflict, validate_range};
use super::mutations::live_reservation;
use super::{Engine, EngineError, VehicleTxn};

/// The reservation must be ACTIVE and `new_end` strictly later than its end.
/// Returns the enlarged range `[start, new_end]` and the quote for it.
fn price_extension(
    reservation: &Reservation,
    new_end: NaiveDate,
) -> Result<(DateRange, i64, Amount), EngineError> {
    if reservation.status != ReservationStatus::Active {
        return Err(EngineError::InvalidState {
            id: reservation.id,
            status: reservation.status,
        });
    }
    if new_end <= reservation.range.end {
        return Err(EngineError::Validation(
            "new end date must be after the current end date",
        ));
    }
    let enlarged = reservation.range.with_end(new_end);
    validate_range(&enlarged)?;
    let additional_days = (new_end - reservation.range.end).num_days();
    let additional_amount = additional_days
        .checked_mul(reservation.daily_rate)
        .ok_or(EngineError::LimitExceeded("extension amount overflows"))?;
    Ok((enlarged, additional_days, additional_amount))
}

impl Engine {
    /// Read-only availability and price of moving a reservation's end date.
    ///
    /// The whole enlarged range `[start, new_end]` is checked, not only the
    /// added tail.
    pub async fn preview_extension(
        &self,
        reservation_id: Ulid,
        new_end: NaiveDate,
    ) -> Result<ExtensionQuote, EngineError> {
        let vehicle_id = self
            .vehicle_for_reservation(&reservation_id)
            .ok_or(EngineError::NotFound(reservation_id))?;
        let vs = self
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(reservation_id))?;
        let guard = vs.read().await;
        let reservation = live_reservation(&guard, reservation_id)?;
        let (enlarged, additional_days, additional_amount) =
            price_extension(reservation, new_end)?;

        let conflicting = find_conflict(&guard, &enlarged, Some(reservation_id));
        Ok(ExtensionQuote {
            available: conflicting.is_none(),
            additional_days,
            additional_amount,
            conflicting_date: conflicting.map(|r| r.range.start),
        })
    }

    /// Persist a PENDING extension awaiting payment. Re-validates everything
    /// a preview checked; at most one PENDING extension per reservation.
    pub async fn request_extension(
        &self,
        reservation_id: Ulid,
        new_end: NaiveDate,
    ) -> Result<Extension, EngineError> {
        let mut txn = self.begin_for_reservation(reservation_id).await?;
        let reservation = live_reservation(&txn, reservation_id)?;
        let (enlarged, _, additional_amount) = price_extension(reservation, new_end)?;
        let original_end_date = reservation.range.end;
        if txn.pending_extension(reservation_id).is_some() {
            return Err(EngineError::DuplicatePending(reservation_id));
        }
        check_no_conflict(&txn, &enlarged, Some(reservation_id))?;

        let extension = Extension {
            id: Ulid::new(),
            reservation_id,
            original_end_date,
            new_end_date: new_end,
            additional_amount,
            payment_status: PaymentStatus::Pending,
            requested_at: Utc::now(),
            approved_at: None,
            paid_at: None,
            deleted_at: None,
        };
        let event = Event::ExtensionRequested {
            vehicle_id: txn.id,
            extension: extension.clone(),
        };
        self.persist_and_apply(&mut txn, &event).await?;
        info!(
            extension = %extension.id,
            reservation = %reservation_id,
            "extension requested to {new_end}"
        );
        Ok(extension)
    }

    /// Settle a paid extension: the extension becomes SUCCEEDED and the
    /// reservation's end date and total move, in a single WAL record.
    /// A second call fails with `AlreadySettled` and changes nothing.
    pub async fn settle_extension(
        &self,
        extension_id: Ulid,
    ) -> Result<(Reservation, Extension), EngineError> {
        let mut txn = self.begin_for_extension(extension_id).await?;
        let extension = txn
            .extension(extension_id)
            .filter(|e| e.deleted_at.is_none())
            .ok_or(EngineError::NotFound(extension_id))?;
        if !extension.is_pending() {
            return Err(EngineError::AlreadySettled(extension_id));
        }
        let extension = extension.clone();
        self.apply_extension(&mut txn, extension).await
    }

    /// Payment for a PENDING extension failed; the reservation is untouched.
    pub async fn fail_extension(&self, extension_id: Ulid) -> Result<Extension, EngineError> {
        let mut txn = self.begin_for_extension(extension_id).await?;
        let extension = txn
            .extension(extension_id)
            .ok_or(EngineError::NotFound(extension_id))?;
        if !extension.is_pending() {
            return Err(EngineError::AlreadySettled(extension_id));
        }
        let event = Event::ExtensionFailed {
            id: extension_id,
            vehicle_id: txn.id,
            at: Utc::now(),
        };
        self.persist_and_apply(&mut txn, &event).await?;
        metrics::counter!(
            crate::observability::EXTENSIONS_TOTAL,
            "outcome" => "failed"
        )
        .increment(1);
        info!(extension = %extension_id, "extension payment failed");
        txn.extension(extension_id)
            .cloned()
            .ok_or(EngineError::NotFound(extension_id))
    }

    /// Extend an ACTIVE reservation whose payment was captured synchronously:
    /// check `[start, new_end]` against all other reservations and record an
    /// already SUCCEEDED extension together with the new end date and total.
    pub async fn extend_reservation(
        &self,
        reservation_id: Ulid,
        new_end: NaiveDate,
    ) -> Result<(Reservation, Extension), EngineError> {
        let mut txn = self.begin_for_reservation(reservation_id).await?;
        let reservation = live_reservation(&txn, reservation_id)?;
        let (_, _, additional_amount) = price_extension(reservation, new_end)?;
        if txn.pending_extension(reservation_id).is_some() {
            return Err(EngineError::DuplicatePending(reservation_id));
        }
        let extension = Extension {
            id: Ulid::new(),
            reservation_id,
            original_end_date: reservation.range.end,
            new_end_date: new_end,
            additional_amount,
            payment_status: PaymentStatus::Pending,
            requested_at: Utc::now(),
            approved_at: None,
            paid_at: None,
            deleted_at: None,
        };
        self.apply_extension(&mut txn, extension).await
    }

    /// Shared settle path. The parent must still be ACTIVE, still end where
    /// the extension started from, and the enlarged range must be free.
    async fn apply_extension(
        &self,
        txn: &mut VehicleTxn,
        mut extension: Extension,
    ) -> Result<(Reservation, Extension), EngineError> {
        let reservation = live_reservation(txn, extension.reservation_id)?;
        if reservation.status != ReservationStatus::Active {
            return Err(EngineError::InvalidState {
                id: reservation.id,
                status: reservation.status,
            });
        }
        if reservation.range.end != extension.original_end_date
            || extension.new_end_date <= reservation.range.end
        {
            return Err(EngineError::Validation(
                "extension no longer matches the reservation's end date",
            ));
        }
        let enlarged = reservation.range.with_end(extension.new_end_date);
        check_no_conflict(txn, &enlarged, Some(reservation.id))?;
        let new_total_amount = reservation
            .total_amount
            .checked_add(extension.additional_amount)
            .ok_or(EngineError::LimitExceeded("total amount overflows"))?;

        let now = Utc::now();
        extension.payment_status = PaymentStatus::Succeeded;
        extension.approved_at = Some(extension.approved_at.unwrap_or(now));
        extension.paid_at = Some(now);
        let event = Event::ReservationExtended {
            vehicle_id: txn.id,
            new_end_date: extension.new_end_date,
            new_total_amount,
            extension: extension.clone(),
        };
        self.persist_and_apply(txn, &event).await?;
        metrics::counter!(
            crate::observability::EXTENSIONS_TOTAL,
            "outcome" => "succeeded"
        )
        .increment(1);
        info!(
            extension = %extension.id,
            reservation = %extension.reservation_id,
            amount = extension.additional_amount,
            "reservation extended to {}",
            extension.new_end_date
        );

        let reservation = live_reservation(txn, extension.reservation_id)?.clone();
        Ok((reservation, extension))
    }
}
