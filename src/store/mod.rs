mod error;
mod mutations;
mod queries;
mod retention;
pub(crate) mod validate;

pub use error::StoreError;
pub use retention::eviction_targets;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedOwnerState = Arc<RwLock<OwnerState>>;

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
/// 2. Buffer it, then drain every Append already queued behind it.
/// 3. One flush_sync for the whole batch, then answer every sender.
///
/// A non-append command ends the batch; the batch is flushed before the
/// command runs, so a compaction never drops an acknowledged append.
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
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            tracing::error!("WAL flush failed for batch of {}: {e}", batch.len());
        }
        respond_batch(batch, &result);

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if result.is_err() {
        rollback(wal);
    }
    result
}

/// Every sender of a failed batch is told its event was not written, so the
/// frames must not survive into a later flush.
fn rollback(wal: &mut Wal) {
    if let Err(e) = wal.discard_uncommitted() {
        tracing::error!("WAL rollback failed, refusing further writes: {e}");
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
        WalCommand::Append { event, response } => {
            let result = wal.append_buffered(&event).and_then(|()| wal.flush_sync());
            if result.is_err() {
                rollback(wal);
            }
            let _ = response.send(result);
        }
    }
}

/// Durable, owner-partitioned booking store.
///
/// Each owner's bookings live behind one `RwLock`. Every mutation takes that
/// owner's write lock for its whole read-decide-persist-apply sequence, so two
/// cancellations for the same owner can never both see a stale cancelled set.
/// Different owners never contend.
pub struct BookingStore {
    pub(super) owners: DashMap<OwnerId, SharedOwnerState>,
    /// Booking id → owner, for id uniqueness across owners.
    pub(super) index: DashMap<Ulid, OwnerId>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Mutations hold it shared; compaction holds it exclusively so the
    /// snapshot it writes can't miss an in-flight append.
    pub(super) compaction_gate: RwLock<()>,
}

/// Apply an event directly to an OwnerState (caller holds the lock).
fn apply_to_owner(os: &mut OwnerState, event: &Event, index: &DashMap<Ulid, OwnerId>) {
    match event {
        Event::BookingCreated { booking } => {
            index.insert(booking.id, booking.owner_id.clone());
            os.insert(booking.clone());
        }
        Event::BookingCancelled {
            id,
            cancelled_at,
            evicted,
            ..
        } => {
            os.mark_cancelled(id, *cancelled_at);
            for evicted_id in evicted {
                os.remove(evicted_id);
                index.remove(evicted_id);
            }
        }
        Event::BookingDeleted { id, .. } => {
            os.remove(id);
            index.remove(id);
        }
    }
}

impl BookingStore {
    /// Replay the WAL at `wal_path` and start the group-commit writer.
    /// Must be called from within a tokio runtime.
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        Ok(Self::from_replay(wal, &events))
    }

    /// Build state from already-replayed `events` and hand `wal` to the writer.
    pub(crate) fn from_replay(wal: Wal, events: &[Event]) -> Self {
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let index = DashMap::new();
        let mut replayed: HashMap<OwnerId, OwnerState> = HashMap::new();
        for event in events {
            let os = replayed
                .entry(event.owner_id().to_string())
                .or_insert_with_key(|owner| OwnerState::new(owner.clone()));
            apply_to_owner(os, event, &index);
        }

        let owners = DashMap::new();
        for (owner_id, os) in replayed.into_iter().filter(|(_, os)| !os.is_empty()) {
            owners.insert(owner_id, Arc::new(RwLock::new(os)));
        }
        tracing::debug!(
            "replayed {} WAL events into {} owners, {} bookings",
            events.len(),
            owners.len(),
            index.len()
        );

        Self {
            owners,
            index,
            wal_tx,
            compaction_gate: RwLock::new(()),
        }
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    pub(super) fn owner(&self, owner_id: &str) -> Option<SharedOwnerState> {
        self.owners.get(owner_id).map(|e| e.value().clone())
    }

    pub(super) fn owner_or_insert(&self, owner_id: &str) -> SharedOwnerState {
        if let Some(os) = self.owner(owner_id) {
            return os;
        }
        self.owners
            .entry(owner_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(OwnerState::new(owner_id.to_string()))))
            .value()
            .clone()
    }

    /// WAL-append, then apply. The WAL record is the commit point: if it
    /// fails, the owner state is left exactly as it was.
    pub(super) async fn persist_and_apply(
        &self,
        os: &mut OwnerState,
        event: &Event,
    ) -> Result<(), StoreError> {
        self.wal_append(event).await?;
        apply_to_owner(os, event, &self.index);
        Ok(())
    }

    pub fn booking_count(&self) -> usize {
        self.index.len()
    }

    pub fn owner_count(&self) -> usize {
        self.owners.len()
    }
}
