//! Records booking attempts that were started but not finished, for
//! recovery messaging. Purely observational: nothing here is consulted when
//! deciding whether a vehicle is available, and no failure here ever reaches
//! the booking path.

use std::path::Path;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;
use ulid::Ulid;

use crate::limits::MAX_IDENTITY_LEN;
use crate::model::{DateRange, VehicleId};
use crate::wal::Wal;

/// How far the renter got before leaving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStep {
    DatesSelected,
    ExtrasSelected,
    DetailsEntered,
    PaymentStarted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbandonmentRecord {
    pub id: Ulid,
    /// Renter id, or e-mail for guests.
    pub identity: String,
    pub vehicle_id: VehicleId,
    pub range: DateRange,
    pub step: BookingStep,
    pub recovered: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum AbandonmentEvent {
    Tracked(AbandonmentRecord),
    Recovered { id: Ulid, at: DateTime<Utc> },
}

pub struct AbandonmentTracker {
    records: DashMap<Ulid, AbandonmentRecord>,
    /// (identity, vehicle) → id of the open (non-recovered) record.
    /// Only `apply` writes here, so it never names an unlogged record.
    open: DashMap<(String, VehicleId), Ulid>,
    /// Held across lookup, write and apply. `None` keeps records in memory only.
    log: Mutex<Option<Wal<AbandonmentEvent>>>,
}

impl AbandonmentTracker {
    /// In-memory only tracker.
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            open: DashMap::new(),
            log: Mutex::new(None),
        }
    }

    /// Tracker persisted to its own log at `path`, replayed on open.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let mut tracker = Self::new();
        for event in Wal::<AbandonmentEvent>::recover(path)? {
            tracker.apply(event);
        }
        *tracker.log.get_mut() = Some(Wal::open(path)?);
        Ok(tracker)
    }

    fn apply(&self, event: AbandonmentEvent) {
        match event {
            AbandonmentEvent::Tracked(record) => {
                if record.recovered {
                    self.open.remove(&(record.identity.clone(), record.vehicle_id));
                } else {
                    self.open
                        .insert((record.identity.clone(), record.vehicle_id), record.id);
                }
                self.records.insert(record.id, record);
            }
            AbandonmentEvent::Recovered { id, at } => {
                if let Some(mut record) = self.records.get_mut(&id) {
                    record.recovered = true;
                    record.updated_at = at;
                    self.open.remove(&(record.identity.clone(), record.vehicle_id));
                }
            }
        }
    }

    /// Persist then apply, with the log lock already held. A failed write is
    /// logged and the event dropped.
    fn commit(&self, log: &mut Option<Wal<AbandonmentEvent>>, event: AbandonmentEvent) {
        if let Some(wal) = log
            && let Err(e) = wal.append(&event)
        {
            warn!("abandonment tracker write failed: {e}");
            return;
        }
        self.apply(event);
    }

    /// Upsert the open record for `(identity, vehicle)` with the latest dates
    /// and step.
    pub async fn track(
        &self,
        identity: &str,
        vehicle_id: VehicleId,
        range: DateRange,
        step: BookingStep,
    ) {
        if identity.is_empty() || identity.len() > MAX_IDENTITY_LEN {
            warn!("abandonment tracker ignored identity of {} bytes", identity.len());
            return;
        }
        let mut log = self.log.lock().await;
        let id = self
            .open
            .get(&(identity.to_string(), vehicle_id))
            .map(|e| *e.value())
            .unwrap_or_else(Ulid::new);
        let record = AbandonmentRecord {
            id,
            identity: identity.to_string(),
            vehicle_id,
            range,
            step,
            recovered: false,
            updated_at: Utc::now(),
        };
        self.commit(&mut log, AbandonmentEvent::Tracked(record));
    }

    /// The renter finished booking: close their open record for the vehicle.
    pub async fn complete(&self, identity: &str, vehicle_id: VehicleId) {
        let mut log = self.log.lock().await;
        let Some(id) = self
            .open
            .get(&(identity.to_string(), vehicle_id))
            .map(|e| *e.value())
        else {
            return;
        };
        self.commit(&mut log, AbandonmentEvent::Recovered { id, at: Utc::now() });
    }

    pub fn get(&self, id: &Ulid) -> Option<AbandonmentRecord> {
        self.records.get(id).map(|e| e.value().clone())
    }

    /// Open records, oldest first.
    pub fn pending(&self) -> Vec<AbandonmentRecord> {
        let mut out: Vec<_> = self
            .records
            .iter()
            .filter(|e| !e.recovered)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|r| r.updated_at);
        out
    }
}

impl Default for AbandonmentTracker {
    fn default() -> Self {
        Self::new()
    }
}
