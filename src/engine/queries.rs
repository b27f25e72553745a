use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::free_ranges;
use super::conflict::{find_conflict, validate_range};
use super::{Engine, EngineError};

// Reads take only the vehicle's read lock; they never lead to a write.
impl Engine {
    /// Whether any non-deleted CONFIRMED/ACTIVE reservation of the vehicle
    /// (other than `exclude`) shares a date with `range`.
    pub async fn has_conflict(
        &self,
        vehicle_id: VehicleId,
        range: DateRange,
        exclude: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        Ok(self.first_conflict(vehicle_id, range, exclude).await?.is_some())
    }

    /// Start date of the first conflicting reservation, for client messaging.
    pub async fn first_conflict(
        &self,
        vehicle_id: VehicleId,
        range: DateRange,
        exclude: Option<Ulid>,
    ) -> Result<Option<NaiveDate>, EngineError> {
        validate_range(&range)?;
        let Some(vs) = self.get_vehicle(&vehicle_id) else {
            return Ok(None);
        };
        let guard = vs.read().await;
        Ok(find_conflict(&guard, &range, exclude).map(|r| r.range.start))
    }

    /// Unclaimed date ranges of a vehicle within `window`.
    pub async fn free_ranges(
        &self,
        vehicle_id: VehicleId,
        window: DateRange,
    ) -> Result<Vec<DateRange>, EngineError> {
        if window.start > window.end {
            return Err(EngineError::Validation("start date is after end date"));
        }
        if window.days() > MAX_QUERY_WINDOW_DAYS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let Some(vs) = self.get_vehicle(&vehicle_id) else {
            return Ok(vec![window]);
        };
        let guard = vs.read().await;
        Ok(free_ranges(&guard, &window))
    }

    /// A non-deleted reservation by id.
    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let vehicle_id = self
            .vehicle_for_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        let vs = self
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(id))?;
        let guard = vs.read().await;
        guard
            .reservation(id)
            .filter(|r| !r.is_deleted())
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    /// Customer-facing listing: every non-deleted reservation of the vehicle,
    /// ordered by start date.
    pub async fn list_reservations(&self, vehicle_id: VehicleId) -> Vec<Reservation> {
        let Some(vs) = self.get_vehicle(&vehicle_id) else {
            return vec![];
        };
        let guard = vs.read().await;
        guard
            .reservations
            .iter()
            .filter(not_deleted)
            .cloned()
            .collect()
    }

    pub async fn get_extension(&self, id: Ulid) -> Result<Extension, EngineError> {
        let vehicle_id = self
            .vehicle_for_extension(&id)
            .ok_or(EngineError::NotFound(id))?;
        let vs = self
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(id))?;
        let guard = vs.read().await;
        guard
            .extension(id)
            .filter(|e| e.deleted_at.is_none())
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    /// Extensions of a reservation in request order.
    pub async fn list_extensions(&self, reservation_id: Ulid) -> Result<Vec<Extension>, EngineError> {
        let reservation = self.get_reservation(reservation_id).await?;
        let Some(vs) = self.get_vehicle(&reservation.vehicle_id) else {
            return Ok(vec![]);
        };
        let guard = vs.read().await;
        Ok(guard
            .extensions_of(reservation_id)
            .filter(|e| e.deleted_at.is_none())
            .cloned()
            .collect())
    }
}
