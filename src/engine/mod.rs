mod availability;
mod conflict;
mod error;
mod extensions;
mod mutations;
mod queries;
mod retention;

pub use availability::{free_ranges, merge_overlapping, subtract_ranges};
pub use error::EngineError;

use std::io;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedVehicleState = Arc<RwLock<VehicleState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal<Event>, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(
    wal: &mut Wal<Event>,
    batch: &[(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even on append error so partially buffered bytes don't leak into
    // the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal<Event>, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let result = wal.append(&event);
            let _ = response.send(result);
        }
    }
}

/// Exclusive write access to one vehicle, taken together with a read share
/// of the commit gate. Compaction takes the gate exclusively, so it never
/// snapshots between a writer's WAL append and its in-memory apply.
pub(super) struct VehicleTxn {
    _gate: OwnedRwLockReadGuard<()>,
    guard: OwnedRwLockWriteGuard<VehicleState>,
}

impl Deref for VehicleTxn {
    type Target = VehicleState;

    fn deref(&self) -> &VehicleState {
        &self.guard
    }
}

impl DerefMut for VehicleTxn {
    fn deref_mut(&mut self) -> &mut VehicleState {
        &mut self.guard
    }
}

/// The reservation store: per-vehicle state in memory, made durable by the WAL.
///
/// Every operation that checks for conflicts and then writes holds the
/// vehicle's write lock across the check, the WAL append and the apply, so
/// two writers on the same vehicle can never both pass the check.
pub struct Engine {
    pub state: DashMap<VehicleId, SharedVehicleState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: reservation id → vehicle id
    pub(super) reservation_index: DashMap<Ulid, VehicleId>,
    /// Reverse lookup: extension id → vehicle id
    pub(super) extension_index: DashMap<Ulid, VehicleId>,
    pub(super) commit_gate: Arc<RwLock<()>>,
}

/// Apply an event directly to a VehicleState. The caller holds the lock.
fn apply_to_vehicle(
    vs: &mut VehicleState,
    event: &Event,
    reservations: &DashMap<Ulid, VehicleId>,
    extensions: &DashMap<Ulid, VehicleId>,
) {
    match event {
        Event::ReservationCreated { reservation } => {
            reservations.insert(reservation.id, reservation.vehicle_id);
            vs.insert_reservation(reservation.clone());
        }
        Event::StatusChanged { id, status, at, .. } => {
            if let Some(r) = vs.reservation_mut(*id) {
                r.status = *status;
                r.updated_at = *at;
            }
        }
        Event::ExtensionRequested {
            vehicle_id,
            extension,
        } => {
            extensions.insert(extension.id, *vehicle_id);
            vs.extensions.push(extension.clone());
        }
        Event::ReservationExtended {
            vehicle_id,
            extension,
            new_end_date,
            new_total_amount,
        } => {
            match vs.extension_mut(extension.id) {
                Some(existing) => *existing = extension.clone(),
                None => {
                    extensions.insert(extension.id, *vehicle_id);
                    vs.extensions.push(extension.clone());
                }
            }
            if let Some(r) = vs.reservation_mut(extension.reservation_id) {
                r.range = r.range.with_end(*new_end_date);
                r.total_amount = *new_total_amount;
                r.updated_at = extension.paid_at.unwrap_or(r.updated_at);
            }
        }
        Event::ExtensionFailed { id, .. } => {
            if let Some(ext) = vs.extension_mut(*id) {
                ext.payment_status = PaymentStatus::Failed;
            }
        }
        Event::ReservationDeleted {
            id,
            deleted_by,
            at,
            ..
        } => {
            if let Some(r) = vs.reservation_mut(*id) {
                r.deleted_at = Some(*at);
                r.deleted_by = Some(deleted_by.clone());
                r.updated_at = *at;
            }
            for ext in vs.extensions.iter_mut() {
                if ext.reservation_id == *id && ext.deleted_at.is_none() {
                    ext.deleted_at = Some(*at);
                }
            }
        }
        Event::ExtensionPurged { id, .. } => {
            vs.extensions.retain(|e| e.id != *id);
            extensions.remove(id);
        }
        Event::ReservationPurged { id, .. } => {
            vs.remove_reservation(*id);
            reservations.remove(id);
        }
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::<Event>::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            reservation_index: DashMap::new(),
            extension_index: DashMap::new(),
            commit_gate: Arc::new(RwLock::new(())),
        };

        // We're the sole owner of these Arcs, so try_write always succeeds.
        // Never use blocking_write here: this runs inside an async context.
        for event in &events {
            let vs = engine.vehicle_state(event.vehicle_id());
            if let Ok(mut guard) = vs.try_write() {
                apply_to_vehicle(
                    &mut guard,
                    event,
                    &engine.reservation_index,
                    &engine.extension_index,
                );
            }
        }

        tracing::info!(
            events = events.len(),
            vehicles = engine.state.len(),
            "reservation store replayed from {}",
            wal_path.display()
        );
        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_vehicle(&self, id: &VehicleId) -> Option<SharedVehicleState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    /// Vehicles are owned elsewhere; their state here is created on first use.
    pub(super) fn vehicle_state(&self, id: VehicleId) -> SharedVehicleState {
        self.state
            .entry(id)
            .or_insert_with(|| Arc::new(RwLock::new(VehicleState::new(id))))
            .value()
            .clone()
    }

    pub fn vehicle_for_reservation(&self, reservation_id: &Ulid) -> Option<VehicleId> {
        self.reservation_index.get(reservation_id).map(|e| *e.value())
    }

    pub fn vehicle_for_extension(&self, extension_id: &Ulid) -> Option<VehicleId> {
        self.extension_index.get(extension_id).map(|e| *e.value())
    }

    /// Acquire the commit gate, then the vehicle's write lock.
    pub(super) async fn begin(&self, vehicle_id: VehicleId) -> VehicleTxn {
        let gate = self.commit_gate.clone().read_owned().await;
        let guard = self.vehicle_state(vehicle_id).write_owned().await;
        VehicleTxn { _gate: gate, guard }
    }

    /// Lookup reservation → vehicle, then begin a write on that vehicle.
    pub(super) async fn begin_for_reservation(
        &self,
        reservation_id: Ulid,
    ) -> Result<VehicleTxn, EngineError> {
        let vehicle_id = self
            .vehicle_for_reservation(&reservation_id)
            .ok_or(EngineError::NotFound(reservation_id))?;
        Ok(self.begin(vehicle_id).await)
    }

    pub(super) async fn begin_for_extension(
        &self,
        extension_id: Ulid,
    ) -> Result<VehicleTxn, EngineError> {
        let vehicle_id = self
            .vehicle_for_extension(&extension_id)
            .ok_or(EngineError::NotFound(extension_id))?;
        Ok(self.begin(vehicle_id).await)
    }

    /// WAL-append + apply + notify in one call. Nothing is applied if the
    /// append fails.
    pub(super) async fn persist_and_apply(
        &self,
        txn: &mut VehicleTxn,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_vehicle(
            txn,
            event,
            &self.reservation_index,
            &self.extension_index,
        );
        self.notify.send(txn.id, event);
        Ok(())
    }
}
