mod availability;
mod capacity;
mod error;
mod mutations;
mod queries;

pub use availability::{check_requested, check_slot, SlotCheck, StartPolicy};
pub use error::EngineError;

use std::io;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::warn;

use crate::model::*;
use crate::pattern::{PatternRegistry, TimePattern};
use crate::wal::Wal;

pub type SharedBuildingState = Arc<RwLock<BuildingState>>;

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

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks on the first append, drains whatever else is already queued, then
/// fsyncs once for the whole batch. A non-append command ends the batch early.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let append_result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes never leak into
    // the next batch.
    let flush_result = wal.flush_sync();
    append_result.and(flush_result)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => {}
    }
}

/// Apply an event to a building (no locking, caller holds the lock).
fn apply_to_building(bs: &mut BuildingState, event: &Event) {
    match event {
        Event::BuildingConfigured { settings, .. } => bs.settings = settings.clone(),
        Event::StaffUpserted { staff, .. } => {
            bs.staff.insert(staff.id, staff.clone());
        }
        Event::MenuUpserted { menu, .. } => {
            bs.menus.insert(menu.id, menu.clone());
        }
        Event::CustomerRegistered { account, .. } => {
            bs.customers.insert(account.id.clone(), account.clone());
        }
        Event::ReservationCreated { reservation, .. } => {
            bs.insert_reservation(reservation.clone());
        }
        Event::TimeFromChanged { moves, .. } => {
            // Re-insert to keep the reservation list sorted.
            for m in moves {
                if let Some(mut r) = bs.remove_reservation(m.reservation_id) {
                    r.time_from = m.time_from;
                    r.time_to = m.time_to;
                    r.staff_id = m.staff_id;
                    bs.insert_reservation(r);
                }
            }
        }
        Event::SecondChoiceChanged {
            reservation_ids,
            second_choice,
            ..
        } => {
            for id in reservation_ids {
                if let Some(r) = bs.reservation_mut(*id) {
                    r.second_choice = second_choice.clone();
                }
            }
        }
        Event::AuditAppended { record, .. } => bs.audit.push(record.clone()),
    }
}

/// A scoped unit of work over one building: holds its write lock from the
/// first read until the guard is dropped.
pub struct BuildingTx {
    pub(super) guard: OwnedRwLockWriteGuard<BuildingState>,
}

impl Deref for BuildingTx {
    type Target = BuildingState;

    fn deref(&self) -> &BuildingState {
        &self.guard
    }
}

pub struct Engine {
    pub state: DashMap<BuildingId, SharedBuildingState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub patterns: Arc<PatternRegistry>,
    /// Highest audit id handed out so far, engine-wide.
    pub(super) last_taio_id: AtomicU64,
    /// Held while a building is added and while compaction snapshots, so a
    /// new building is either in the snapshot or appended after the swap.
    pub(super) catalog: Mutex<()>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, patterns: Arc<PatternRegistry>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            patterns,
            last_taio_id: AtomicU64::new(0),
            catalog: Mutex::new(()),
        };

        // Replay: we are the sole owner of these Arcs, so try_write never contends.
        for event in &events {
            if let Event::AuditAppended { record, .. } = event {
                engine.last_taio_id.fetch_max(record.id.0, Ordering::SeqCst);
            }
            match (event, engine.get_building(event.building())) {
                (Event::BuildingConfigured { building, settings }, None) => {
                    let bs = BuildingState::new(building.clone(), settings.clone());
                    engine.state.insert(building.clone(), Arc::new(RwLock::new(bs)));
                }
                (_, Some(shared)) => match shared.try_write() {
                    Ok(mut guard) => apply_to_building(&mut guard, event),
                    Err(_) => warn!("replay: building {} unexpectedly locked", event.building()),
                },
                (_, None) => warn!("replay: event for unconfigured building {}", event.building()),
            }
        }

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

    pub fn get_building(&self, id: &BuildingId) -> Option<SharedBuildingState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    /// WAL-append then apply, under the caller's write lock.
    pub(super) async fn persist_and_apply(
        &self,
        bs: &mut BuildingState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_building(bs, event);
        Ok(())
    }

    /// Open a unit of work on a building, taking its write lock.
    pub async fn begin(&self, building: &BuildingId) -> Result<BuildingTx, EngineError> {
        let shared = self
            .get_building(building)
            .ok_or_else(|| EngineError::UnknownBuilding(building.clone()))?;
        Ok(BuildingTx {
            guard: shared.write_owned().await,
        })
    }

    /// Consistent read snapshot of a building.
    pub async fn read(
        &self,
        building: &BuildingId,
    ) -> Result<OwnedRwLockReadGuard<BuildingState>, EngineError> {
        let shared = self
            .get_building(building)
            .ok_or_else(|| EngineError::UnknownBuilding(building.clone()))?;
        Ok(shared.read_owned().await)
    }

    /// The pattern configured for a building, if the registry knows it.
    pub fn pattern_for(&self, bs: &BuildingState) -> Option<Arc<TimePattern>> {
        self.patterns.get(bs.settings.pattern_id)
    }

    pub(super) fn next_taio_id(&self) -> TaioId {
        TaioId(self.last_taio_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}
