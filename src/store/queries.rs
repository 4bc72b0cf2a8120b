use ulid::Ulid;

use crate::model::*;

use super::BookingStore;

impl BookingStore {
    /// Lookup scoped to `owner_id`. Another owner's booking is never returned,
    /// even when the id exists.
    pub async fn get_by_id(&self, id: Ulid, owner_id: &str) -> Option<Booking> {
        let os = self.owner(owner_id)?;
        let guard = os.read().await;
        guard.get(&id).cloned()
    }

    /// All of an owner's bookings, latest `scheduled_at` first.
    pub async fn list_by_owner(&self, owner_id: &str) -> Vec<Booking> {
        let Some(os) = self.owner(owner_id) else {
            return Vec::new();
        };
        let guard = os.read().await;
        guard.by_schedule_desc().cloned().collect()
    }

    pub async fn list_upcoming_active(&self, owner_id: &str, limit: usize) -> Vec<Booking> {
        self.list_upcoming_active_at(owner_id, now_ms(), limit).await
    }

    /// Active bookings with `scheduled_at >= now`, soonest first, at most `limit`.
    pub async fn list_upcoming_active_at(&self, owner_id: &str, now: Ms, limit: usize) -> Vec<Booking> {
        let Some(os) = self.owner(owner_id) else {
            return Vec::new();
        };
        let guard = os.read().await;
        guard.upcoming_active(now).take(limit).cloned().collect()
    }

    /// The owner's cancelled bookings in eviction order (oldest first).
    pub async fn list_cancelled(&self, owner_id: &str) -> Vec<Booking> {
        let Some(os) = self.owner(owner_id) else {
            return Vec::new();
        };
        let guard = os.read().await;
        guard.cancelled_oldest_first().cloned().collect()
    }
}
