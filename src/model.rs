use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

pub fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Opaque identity of the owning user, as issued by the identity service.
pub type OwnerId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Active,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Active => "active",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reservation held by a single owner.
///
/// `cancelled_at` is `Some` exactly when `status` is `Cancelled`. The only
/// way to reach that state is [`Booking::cancel`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub owner_id: OwnerId,
    pub scheduled_at: Ms,
    pub service_name: String,
    pub status: BookingStatus,
    pub cancelled_at: Option<Ms>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Booking {
    pub fn new(id: Ulid, owner_id: OwnerId, scheduled_at: Ms, service_name: String, now: Ms) -> Self {
        Self {
            id,
            owner_id,
            scheduled_at,
            service_name,
            status: BookingStatus::Active,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == BookingStatus::Active
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == BookingStatus::Cancelled
    }

    /// One-way transition. Returns false (and changes nothing) if already cancelled.
    pub fn cancel(&mut self, at: Ms) -> bool {
        if self.is_cancelled() {
            return false;
        }
        self.status = BookingStatus::Cancelled;
        self.cancelled_at = Some(at);
        self.updated_at = at;
        true
    }

    /// Sort key of the cancelled set: oldest cancellation first, id breaks ties.
    pub fn cancellation_key(&self) -> Option<(Ms, Ulid)> {
        self.cancelled_at.map(|at| (at, self.id))
    }
}

/// Everything one owner has booked, plus the orderings the store scans.
///
/// The store keeps one of these per owner behind a single lock, so the
/// cancelled set and the records it indexes always change together.
#[derive(Debug, Clone, Default)]
pub struct OwnerState {
    pub owner_id: OwnerId,
    bookings: HashMap<Ulid, Booking>,
    /// `(scheduled_at, id)` ascending.
    by_schedule: BTreeSet<(Ms, Ulid)>,
    /// `(cancelled_at, id)` ascending, i.e. eviction order.
    cancelled: BTreeSet<(Ms, Ulid)>,
}

impl OwnerState {
    pub fn new(owner_id: OwnerId) -> Self {
        Self {
            owner_id,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }

    pub fn get(&self, id: &Ulid) -> Option<&Booking> {
        self.bookings.get(id)
    }

    /// Insert (or replace) a booking and index it.
    pub fn insert(&mut self, booking: Booking) {
        self.remove(&booking.id);
        self.by_schedule.insert((booking.scheduled_at, booking.id));
        if let Some(key) = booking.cancellation_key() {
            self.cancelled.insert(key);
        }
        self.bookings.insert(booking.id, booking);
    }

    pub fn remove(&mut self, id: &Ulid) -> Option<Booking> {
        let booking = self.bookings.remove(id)?;
        self.by_schedule.remove(&(booking.scheduled_at, booking.id));
        if let Some(key) = booking.cancellation_key() {
            self.cancelled.remove(&key);
        }
        Some(booking)
    }

    /// Move a booking into the cancelled set. False if absent or already cancelled.
    pub fn mark_cancelled(&mut self, id: &Ulid, at: Ms) -> bool {
        let Some(booking) = self.bookings.get_mut(id) else {
            return false;
        };
        if !booking.cancel(at) {
            return false;
        }
        self.cancelled.insert((at, *id));
        true
    }

    pub fn cancelled_count(&self) -> usize {
        self.cancelled.len()
    }

    pub fn newest_cancelled_at(&self) -> Option<Ms> {
        self.cancelled.last().map(|(at, _)| *at)
    }

    pub fn cancelled_oldest_first(&self) -> impl Iterator<Item = &Booking> {
        self.cancelled.iter().filter_map(|(_, id)| self.bookings.get(id))
    }

    pub fn by_schedule_desc(&self) -> impl Iterator<Item = &Booking> {
        self.by_schedule
            .iter()
            .rev()
            .filter_map(|(_, id)| self.bookings.get(id))
    }

    /// Active bookings scheduled at or after `now`, soonest first.
    pub fn upcoming_active(&self, now: Ms) -> impl Iterator<Item = &Booking> {
        self.by_schedule
            .range((now, Ulid::nil())..)
            .filter_map(|(_, id)| self.bookings.get(id))
            .filter(|b| b.is_active())
    }
}

/// The event types. This is the WAL record format.
///
/// A cancellation and the evictions it caused are one record, so replay
/// either applies both or neither.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingCreated {
        booking: Booking,
    },
    BookingCancelled {
        id: Ulid,
        owner_id: OwnerId,
        cancelled_at: Ms,
        evicted: Vec<Ulid>,
    },
    BookingDeleted {
        id: Ulid,
        owner_id: OwnerId,
    },
}

impl Event {
    pub fn owner_id(&self) -> &str {
        match self {
            Event::BookingCreated { booking } => &booking.owner_id,
            Event::BookingCancelled { owner_id, .. } | Event::BookingDeleted { owner_id, .. } => {
                owner_id
            }
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// Outcome of a cancel-and-evict transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelOutcome {
    /// The target booking in its cancelled state.
    pub booking: Booking,
    /// Bookings permanently removed to respect the retention cap.
    pub evicted: Vec<Booking>,
    /// False when the target was already cancelled and nothing was written.
    pub transitioned: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Booking {
        Booking::new(Ulid::new(), "owner-1".into(), 5_000, "Hotel Paradise".into(), 1_000)
    }

    #[test]
    fn new_booking_is_active() {
        let b = sample();
        assert_eq!(b.status, BookingStatus::Active);
        assert_eq!(b.cancelled_at, None);
        assert_eq!(b.created_at, b.updated_at);
        assert!(b.cancellation_key().is_none());
    }

    #[test]
    fn cancel_sets_timestamp_once() {
        let mut b = sample();
        assert!(b.cancel(2_000));
        assert_eq!(b.status, BookingStatus::Cancelled);
        assert_eq!(b.cancelled_at, Some(2_000));
        assert_eq!(b.updated_at, 2_000);

        // Second cancel is a no-op
        assert!(!b.cancel(3_000));
        assert_eq!(b.cancelled_at, Some(2_000));
        assert_eq!(b.updated_at, 2_000);
    }

    #[test]
    fn cancellation_key_orders_by_time_then_id() {
        let mut a = sample();
        let mut b = sample();
        a.cancel(10);
        b.cancel(10);
        let (ka, kb) = (a.cancellation_key().unwrap(), b.cancellation_key().unwrap());
        assert_eq!(ka.cmp(&kb), a.id.cmp(&b.id));
    }

    fn booking_at(owner: &str, scheduled_at: Ms, service: &str) -> Booking {
        Booking::new(Ulid::new(), owner.into(), scheduled_at, service.into(), 0)
    }

    #[test]
    fn owner_state_orders_by_schedule() {
        let mut os = OwnerState::new("u1".into());
        let late = booking_at("u1", 300, "late");
        let early = booking_at("u1", 100, "early");
        let mid = booking_at("u1", 200, "mid");
        os.insert(late);
        os.insert(early);
        os.insert(mid);

        let names: Vec<_> = os.by_schedule_desc().map(|b| b.service_name.as_str()).collect();
        assert_eq!(names, vec!["late", "mid", "early"]);
    }

    #[test]
    fn owner_state_upcoming_skips_past_and_cancelled() {
        let mut os = OwnerState::new("u1".into());
        let past = booking_at("u1", 50, "past");
        let cancelled = booking_at("u1", 150, "cancelled");
        let at_now = booking_at("u1", 100, "now");
        let future = booking_at("u1", 200, "future");
        let cancelled_id = cancelled.id;
        for b in [past, cancelled, at_now, future] {
            os.insert(b);
        }
        assert!(os.mark_cancelled(&cancelled_id, 120));

        let names: Vec<_> = os.upcoming_active(100).map(|b| b.service_name.as_str()).collect();
        assert_eq!(names, vec!["now", "future"]);
    }

    #[test]
    fn owner_state_cancelled_index_tracks_removals() {
        let mut os = OwnerState::new("u1".into());
        let a = booking_at("u1", 100, "a");
        let b = booking_at("u1", 100, "b");
        let (ida, idb) = (a.id, b.id);
        os.insert(a);
        os.insert(b);

        assert!(os.mark_cancelled(&idb, 10));
        assert!(os.mark_cancelled(&ida, 20));
        assert!(!os.mark_cancelled(&ida, 30));
        let order: Vec<_> = os.cancelled_oldest_first().map(|b| b.id).collect();
        assert_eq!(order, vec![idb, ida]);

        os.remove(&idb);
        assert_eq!(os.cancelled_count(), 1);
        assert_eq!(os.len(), 1);
        assert!(os.get(&idb).is_none());
    }

    #[test]
    fn newest_cancelled_at_tracks_latest_cancellation() {
        let mut os = OwnerState::new("u1".into());
        assert_eq!(os.newest_cancelled_at(), None);
        let (a, b) = (booking_at("u1", 100, "a"), booking_at("u1", 100, "b"));
        let (ida, idb) = (a.id, b.id);
        os.insert(a);
        os.insert(b);
        os.mark_cancelled(&ida, 30);
        os.mark_cancelled(&idb, 20);
        assert_eq!(os.newest_cancelled_at(), Some(30));
        os.remove(&ida);
        assert_eq!(os.newest_cancelled_at(), Some(20));
    }

    #[test]
    fn owner_state_insert_of_cancelled_booking_is_indexed() {
        let mut os = OwnerState::new("u1".into());
        let mut b = booking_at("u1", 100, "replayed");
        b.cancel(42);
        os.insert(b);
        assert_eq!(os.cancelled_count(), 1);
        assert_eq!(os.upcoming_active(0).count(), 0);
    }

    #[test]
    fn event_owner_id() {
        let b = sample();
        let created = Event::BookingCreated { booking: b.clone() };
        assert_eq!(created.owner_id(), "owner-1");
        let deleted = Event::BookingDeleted { id: b.id, owner_id: "owner-2".into() };
        assert_eq!(deleted.owner_id(), "owner-2");
    }
}
