use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

fn bound((y, m, d): (i32, u32, u32)) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
}

pub(crate) fn validate_range(range: &DateRange) -> Result<(), EngineError> {
    if range.start > range.end {
        return Err(EngineError::Validation("start date is after end date"));
    }
    if range.start < bound(MIN_VALID_DATE) || range.end > bound(MAX_VALID_DATE) {
        return Err(EngineError::Validation("date out of range"));
    }
    if range.days() > MAX_RESERVATION_DAYS {
        return Err(EngineError::LimitExceeded("reservation too long"));
    }
    Ok(())
}

pub(crate) fn validate_draft(draft: &ReservationDraft) -> Result<(), EngineError> {
    validate_range(&draft.range)?;
    if draft.daily_rate < 0 {
        return Err(EngineError::Validation("daily rate is negative"));
    }
    if draft.extras.len() > MAX_EXTRAS {
        return Err(EngineError::LimitExceeded("too many extras"));
    }
    for extra in &draft.extras {
        if extra.amount < 0 {
            return Err(EngineError::Validation("extra amount is negative"));
        }
        if extra.code.len() > MAX_EXTRA_CODE_LEN {
            return Err(EngineError::LimitExceeded("extra code too long"));
        }
    }
    for loc in [&draft.pickup_location, &draft.dropoff_location]
        .into_iter()
        .flatten()
    {
        if loc.len() > MAX_LOCATION_LEN {
            return Err(EngineError::LimitExceeded("location too long"));
        }
    }
    if draft.total_amount().is_none() {
        return Err(EngineError::LimitExceeded("total amount overflows"));
    }
    Ok(())
}

/// First reservation on the vehicle that claims any date of `range`.
///
/// Only non-deleted CONFIRMED/ACTIVE rows count; `exclude` skips the
/// reservation being re-checked against itself.
pub(crate) fn find_conflict<'a>(
    vs: &'a VehicleState,
    range: &DateRange,
    exclude: Option<Ulid>,
) -> Option<&'a Reservation> {
    vs.overlapping(range)
        .filter(not_deleted)
        .filter(|r| r.status.is_blocking())
        .find(|r| Some(r.id) != exclude && r.range.overlaps(range))
}

#[cfg(test)]
pub(crate) fn has_conflict(vs: &VehicleState, range: &DateRange, exclude: Option<Ulid>) -> bool {
    find_conflict(vs, range, exclude).is_some()
}

pub(crate) fn check_no_conflict(
    vs: &VehicleState,
    range: &DateRange,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match find_conflict(vs, range, exclude) {
        Some(other) => {
            metrics::counter!(crate::observability::CONFLICTS_TOTAL).increment(1);
            tracing::debug!(
                vehicle = %vs.id,
                conflicting = %other.id,
                "range {}..={} rejected",
                range.start,
                range.end
            );
            Err(EngineError::conflict(other.id, other.range.start))
        }
        None => Ok(()),
    }
}
