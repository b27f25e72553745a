use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Money in minor units (cents).
pub type Amount = i64;

pub type VehicleId = Ulid;
pub type RenterId = Ulid;

/// Closed interval `[start, end]` of whole calendar dates.
///
/// Both boundaries are claimed: a reservation ending on a date blocks another
/// one starting on that same date (hand-over time is not modeled).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "DateRange start must not be after end");
        Self { start, end }
    }

    /// Number of calendar days covered, boundaries included.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Same start, different end.
    pub fn with_end(&self, end: NaiveDate) -> Self {
        Self::new(self.start, end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Active,
    Completed,
    Cancelled,
}

impl ReservationStatus {
    /// Statuses whose reservation claims its dates against other bookings.
    pub fn is_blocking(self) -> bool {
        matches!(self, Self::Confirmed | Self::Active)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Legal edges of the booking lifecycle.
    pub fn can_transition_to(self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Confirmed, Active)
                | (Active, Completed)
                | (Pending, Cancelled)
                | (Confirmed, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque priced add-on (child seat, GPS, insurance...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extra {
    pub code: String,
    pub amount: Amount,
}

/// Everything a caller supplies to book a vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationDraft {
    pub vehicle_id: VehicleId,
    pub renter_id: RenterId,
    pub range: DateRange,
    pub daily_rate: Amount,
    pub extras: Vec<Extra>,
    pub pickup_location: Option<String>,
    pub dropoff_location: Option<String>,
    /// Payment already captured upstream: insert as CONFIRMED instead of PENDING.
    pub confirm_immediately: bool,
}

impl ReservationDraft {
    /// `None` when the sum does not fit in an [`Amount`].
    pub fn extras_total(&self) -> Option<Amount> {
        self.extras
            .iter()
            .try_fold(0 as Amount, |acc, e| acc.checked_add(e.amount))
    }

    /// Rate times days plus extras, `None` on overflow.
    pub fn total_amount(&self) -> Option<Amount> {
        self.daily_rate
            .checked_mul(self.range.days())?
            .checked_add(self.extras_total()?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub vehicle_id: VehicleId,
    pub renter_id: RenterId,
    pub range: DateRange,
    pub status: ReservationStatus,
    pub daily_rate: Amount,
    pub extras: Vec<Extra>,
    pub total_amount: Amount,
    pub pickup_location: Option<String>,
    pub dropoff_location: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether this row takes part in conflict detection at all.
    pub fn claims_dates(&self) -> bool {
        !self.is_deleted() && self.status.is_blocking()
    }
}

/// Read-path filter for soft-deleted rows. Every listing applies it explicitly.
pub fn not_deleted(r: &&Reservation) -> bool {
    !r.is_deleted()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extension {
    pub id: Ulid,
    pub reservation_id: Ulid,
    pub original_end_date: NaiveDate,
    pub new_end_date: NaiveDate,
    pub additional_amount: Amount,
    pub payment_status: PaymentStatus,
    pub requested_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Extension {
    pub fn is_pending(&self) -> bool {
        self.payment_status == PaymentStatus::Pending
    }
}

/// Price and availability of a prospective extension. Nothing is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionQuote {
    pub available: bool,
    pub additional_days: i64,
    pub additional_amount: Amount,
    /// Start date of the first conflicting reservation, when unavailable.
    pub conflicting_date: Option<NaiveDate>,
}

/// All reservations and extensions of one vehicle. Guarded by a single lock,
/// so any check-and-write on a vehicle is serialized against other writers.
#[derive(Debug, Clone)]
pub struct VehicleState {
    pub id: VehicleId,
    /// Sorted by `range.start`.
    pub reservations: Vec<Reservation>,
    pub extensions: Vec<Extension>,
}

impl VehicleState {
    pub fn new(id: VehicleId) -> Self {
        Self {
            id,
            reservations: Vec::new(),
            extensions: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by range.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.range.start, |r| r.range.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn reservation_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    pub fn extension(&self, id: Ulid) -> Option<&Extension> {
        self.extensions.iter().find(|e| e.id == id)
    }

    pub fn extension_mut(&mut self, id: Ulid) -> Option<&mut Extension> {
        self.extensions.iter_mut().find(|e| e.id == id)
    }

    pub fn extensions_of(&self, reservation_id: Ulid) -> impl Iterator<Item = &Extension> {
        self.extensions
            .iter()
            .filter(move |e| e.reservation_id == reservation_id)
    }

    pub fn pending_extension(&self, reservation_id: Ulid) -> Option<&Extension> {
        self.extensions_of(reservation_id).find(|e| e.is_pending())
    }

    /// Return only reservations whose range overlaps the query, regardless of
    /// status or soft-delete marker. Uses binary search to skip reservations
    /// starting after `query.end`.
    pub fn overlapping(&self, query: &DateRange) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.range.start <= query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.range.end >= query.start)
    }
}

/// Committed state changes. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationCreated {
        reservation: Reservation,
    },
    StatusChanged {
        id: Ulid,
        vehicle_id: VehicleId,
        status: ReservationStatus,
        at: DateTime<Utc>,
    },
    ExtensionRequested {
        vehicle_id: VehicleId,
        extension: Extension,
    },
    /// Settles an extension and moves the reservation's end in one record.
    ReservationExtended {
        vehicle_id: VehicleId,
        extension: Extension,
        new_end_date: NaiveDate,
        new_total_amount: Amount,
    },
    ExtensionFailed {
        id: Ulid,
        vehicle_id: VehicleId,
        at: DateTime<Utc>,
    },
    ReservationDeleted {
        id: Ulid,
        vehicle_id: VehicleId,
        deleted_by: String,
        at: DateTime<Utc>,
    },
    ExtensionPurged {
        id: Ulid,
        vehicle_id: VehicleId,
    },
    ReservationPurged {
        id: Ulid,
        vehicle_id: VehicleId,
    },
}

impl Event {
    pub fn vehicle_id(&self) -> VehicleId {
        match self {
            Event::ReservationCreated { reservation } => reservation.vehicle_id,
            Event::StatusChanged { vehicle_id, .. }
            | Event::ExtensionRequested { vehicle_id, .. }
            | Event::ReservationExtended { vehicle_id, .. }
            | Event::ExtensionFailed { vehicle_id, .. }
            | Event::ReservationDeleted { vehicle_id, .. }
            | Event::ExtensionPurged { vehicle_id, .. }
            | Event::ReservationPurged { vehicle_id, .. } => *vehicle_id,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    pub fn june(from: u32, to: u32) -> DateRange {
        DateRange::new(date(2024, 6, from), date(2024, 6, to))
    }

    pub fn reservation(range: DateRange, status: ReservationStatus) -> Reservation {
        let now = Utc::now();
        Reservation {
            id: Ulid::new(),
            vehicle_id: Ulid::nil(),
            renter_id: Ulid::new(),
            range,
            status,
            daily_rate: 5_000,
            extras: Vec::new(),
            total_amount: 5_000 * range.days(),
            pickup_location: None,
            dropoff_location: None,
            deleted_at: None,
            deleted_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}
