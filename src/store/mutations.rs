use tokio::sync::oneshot;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::RETENTION_CAP;
use crate::model::*;

use super::retention::eviction_targets;
use super::validate::{validate_owner, validate_schedule, validate_service_name};
use super::{BookingStore, StoreError, WalCommand};

impl BookingStore {
    pub async fn create(
        &self,
        owner_id: &str,
        scheduled_at: Ms,
        service_name: &str,
    ) -> Result<Booking, StoreError> {
        self.create_at(owner_id, scheduled_at, service_name, now_ms()).await
    }

    pub async fn create_at(
        &self,
        owner_id: &str,
        scheduled_at: Ms,
        service_name: &str,
        now: Ms,
    ) -> Result<Booking, StoreError> {
        validate_owner(owner_id)?;
        validate_schedule(scheduled_at)?;
        let service_name = validate_service_name(service_name)?;

        let _gate = self.compaction_gate.read().await;
        let os = self.owner_or_insert(owner_id);
        let mut guard = os.write().await;

        let booking = Booking::new(
            Ulid::new(),
            owner_id.to_string(),
            scheduled_at,
            service_name.to_string(),
            now,
        );
        let event = Event::BookingCreated { booking: booking.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        debug!("created booking {} for {owner_id}", booking.id);
        Ok(booking)
    }

    /// Remove a booking outright, whatever its status. Returns the prior record.
    pub async fn delete_by_id(&self, id: Ulid, owner_id: &str) -> Result<Booking, StoreError> {
        let _gate = self.compaction_gate.read().await;
        let os = self.owner(owner_id).ok_or(StoreError::NotFound(id))?;
        let mut guard = os.write().await;

        let booking = guard.get(&id).cloned().ok_or(StoreError::NotFound(id))?;
        let event = Event::BookingDeleted {
            id,
            owner_id: owner_id.to_string(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        debug!("deleted booking {id} for {owner_id}");
        Ok(booking)
    }

    pub async fn cancel_and_evict(&self, id: Ulid, owner_id: &str) -> Result<CancelOutcome, StoreError> {
        self.cancel_and_evict_at(id, owner_id, now_ms()).await
    }

    /// Cancel a booking and purge the owner's oldest cancellations beyond
    /// [`RETENTION_CAP`], as one transaction.
    ///
    /// The owner's write lock is held from lookup through apply, so the
    /// cancelled set the eviction decision is computed from cannot change
    /// underneath it. The cancellation and the evictions are persisted as a
    /// single WAL record; if that write fails nothing is applied. The new
    /// `cancelled_at` is never earlier than the owner's newest cancellation.
    ///
    /// Cancelling an already-cancelled booking returns it unchanged with
    /// `transitioned == false`: no write, no new timestamp, no eviction.
    pub async fn cancel_and_evict_at(
        &self,
        id: Ulid,
        owner_id: &str,
        now: Ms,
    ) -> Result<CancelOutcome, StoreError> {
        let _gate = self.compaction_gate.read().await;
        let os = self.owner(owner_id).ok_or(StoreError::NotFound(id))?;
        let mut guard = os.write().await;

        let current = guard.get(&id).ok_or(StoreError::NotFound(id))?;
        if current.is_cancelled() {
            return Ok(CancelOutcome {
                booking: current.clone(),
                evicted: Vec::new(),
                transitioned: false,
            });
        }
        // A clock that stepped back must not file this cancellation behind
        // older ones, or it would be evicted by its own transaction.
        let cancelled_at = guard.newest_cancelled_at().map_or(now, |newest| newest.max(now));
        let mut target = current.clone();
        target.cancel(cancelled_at);

        // The target is the newest cancellation, so the oldest of the rest go.
        let cancelled: Vec<Booking> = guard.cancelled_oldest_first().cloned().collect();
        let evicted = eviction_targets(&cancelled, RETENTION_CAP.saturating_sub(1)).to_vec();

        let event = Event::BookingCancelled {
            id,
            owner_id: owner_id.to_string(),
            cancelled_at,
            evicted: evicted.iter().map(|b| b.id).collect(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        debug_assert!(guard.cancelled_count() <= RETENTION_CAP);

        if !evicted.is_empty() {
            info!(
                "cancelled booking {id} for {owner_id}; evicted {} past retention cap",
                evicted.len()
            );
            metrics::counter!(crate::observability::EVICTIONS_TOTAL).increment(evicted.len() as u64);
        } else {
            debug!("cancelled booking {id} for {owner_id}");
        }

        Ok(CancelOutcome {
            booking: target,
            evicted,
            transitioned: true,
        })
    }

    /// Compact the WAL by rewriting it as one `BookingCreated` per live booking,
    /// and drop owners left with no bookings. Returns the number of records
    /// written.
    pub async fn compact_wal(&self) -> Result<usize, StoreError> {
        let _gate = self.compaction_gate.write().await;

        let owners: Vec<_> = self
            .owners
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let mut events = Vec::with_capacity(self.index.len());
        for (owner_id, os) in owners {
            let guard = os.read().await;
            // No mutation can hold this owner while the gate is exclusive.
            if guard.is_empty() {
                self.owners.remove(&owner_id);
                continue;
            }
            events.extend(
                guard
                    .by_schedule_desc()
                    .map(|b| Event::BookingCreated { booking: b.clone() }),
            );
        }
        let written = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))?;
        Ok(written)
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
