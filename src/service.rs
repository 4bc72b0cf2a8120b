use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::warn;
use ulid::Ulid;

use crate::compactor;
use crate::config::Config;
use crate::display::ScheduleFormatter;
use crate::error::ServiceError;
use crate::identity::{HttpIdentityVerifier, Identity, IdentityVerifier};
use crate::limits::UPCOMING_LIMIT;
use crate::model::Booking;
use crate::notify::{HttpNotifier, Notification, NotificationKind, Notifier};
use crate::observability::{self, IDENTITY_FAILURES_TOTAL, NOTIFICATIONS_FAILED_TOTAL};
use crate::store::validate::validate_service_name;
use crate::store::BookingStore;

pub const CANCELLED_MESSAGE: &str = "Booking cancelled successfully";
pub const DELETED_MESSAGE: &str = "Booking deleted successfully";

/// A booking as returned by listings: the record plus its schedule rendered
/// in the configured zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingView {
    #[serde(flatten)]
    pub booking: Booking,
    pub scheduled_display: String,
}

/// `{ message, booking }` result of cancel and delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutationResult {
    pub message: String,
    pub booking: Booking,
}

/// Sequences identity verification, the store call, and notification
/// dispatch for every externally visible booking operation.
pub struct BookingService {
    store: Arc<BookingStore>,
    identity: Arc<dyn IdentityVerifier>,
    notifier: Arc<dyn Notifier>,
    formatter: ScheduleFormatter,
}

impl BookingService {
    pub fn new(
        store: Arc<BookingStore>,
        identity: Arc<dyn IdentityVerifier>,
        notifier: Arc<dyn Notifier>,
        formatter: ScheduleFormatter,
    ) -> Self {
        Self {
            store,
            identity,
            notifier,
            formatter,
        }
    }

    /// Open the store under `config.data_dir`, wire the HTTP collaborators,
    /// start the WAL compactor, and serve metrics when a port is configured.
    /// Must be called from within a tokio runtime.
    pub fn from_config(config: &Config) -> io::Result<Self> {
        observability::init_metrics(config.metrics_port).map_err(io::Error::other)?;
        std::fs::create_dir_all(&config.data_dir)?;
        let store = Arc::new(BookingStore::open(config.wal_path())?);
        let identity = HttpIdentityVerifier::new(config.user_service_url.clone(), config.http_timeout)
            .map_err(io::Error::other)?;
        let notifier = HttpNotifier::new(config.notification_service_url.clone(), config.http_timeout)
            .map_err(io::Error::other)?;

        tokio::spawn(compactor::run_compactor(store.clone(), config.compact_threshold));
        tracing::info!("booking store opened at {}", config.wal_path().display());
        tracing::info!("  bookings: {}", store.booking_count());
        tracing::info!("  owners: {}", store.owner_count());

        Ok(Self::new(
            store,
            Arc::new(identity),
            Arc::new(notifier),
            ScheduleFormatter::new(config.timezone),
        ))
    }

    pub fn store(&self) -> &Arc<BookingStore> {
        &self.store
    }

    pub async fn create_booking(
        &self,
        token: &str,
        scheduled_at: &str,
        service_name: &str,
    ) -> Result<Booking, ServiceError> {
        instrumented("create_booking", self.create(token, scheduled_at, service_name)).await
    }

    pub async fn list_bookings(&self, token: &str) -> Result<Vec<BookingView>, ServiceError> {
        instrumented("list_bookings", self.list(token)).await
    }

    /// The next [`UPCOMING_LIMIT`] active bookings from now, soonest first.
    pub async fn list_upcoming(&self, token: &str) -> Result<Vec<BookingView>, ServiceError> {
        instrumented("list_upcoming", self.upcoming(token)).await
    }

    /// Cancel a booking (evicting the owner's oldest cancellations past the
    /// cap) and notify. Re-cancelling returns the stored record and sends
    /// nothing.
    pub async fn cancel_booking(&self, token: &str, id: Ulid) -> Result<MutationResult, ServiceError> {
        instrumented("cancel_booking", self.cancel(token, id)).await
    }

    pub async fn delete_booking(&self, token: &str, id: Ulid) -> Result<MutationResult, ServiceError> {
        instrumented("delete_booking", self.delete(token, id)).await
    }

    async fn create(&self, token: &str, scheduled_at: &str, service_name: &str) -> Result<Booking, ServiceError> {
        let identity = self.verify(token).await?;
        let scheduled_at = self
            .formatter
            .parse(scheduled_at)
            .ok_or_else(|| ServiceError::Validation(format!("invalid schedule {scheduled_at:?}")))?;
        validate_service_name(service_name)?;

        let booking = self
            .store
            .create(&identity.owner_id, scheduled_at, service_name)
            .await?;
        self.dispatch(NotificationKind::Created, &identity, &booking);
        Ok(booking)
    }

    async fn list(&self, token: &str) -> Result<Vec<BookingView>, ServiceError> {
        let identity = self.verify(token).await?;
        let bookings = self.store.list_by_owner(&identity.owner_id).await;
        Ok(self.views(bookings))
    }

    async fn upcoming(&self, token: &str) -> Result<Vec<BookingView>, ServiceError> {
        let identity = self.verify(token).await?;
        let bookings = self
            .store
            .list_upcoming_active(&identity.owner_id, UPCOMING_LIMIT)
            .await;
        Ok(self.views(bookings))
    }

    async fn cancel(&self, token: &str, id: Ulid) -> Result<MutationResult, ServiceError> {
        let identity = self.verify(token).await?;
        let outcome = self.store.cancel_and_evict(id, &identity.owner_id).await?;
        if outcome.transitioned {
            self.dispatch(NotificationKind::Cancelled, &identity, &outcome.booking);
        }
        Ok(MutationResult {
            message: CANCELLED_MESSAGE.to_string(),
            booking: outcome.booking,
        })
    }

    async fn delete(&self, token: &str, id: Ulid) -> Result<MutationResult, ServiceError> {
        let identity = self.verify(token).await?;
        let booking = self.store.delete_by_id(id, &identity.owner_id).await?;
        Ok(MutationResult {
            message: DELETED_MESSAGE.to_string(),
            booking,
        })
    }

    async fn verify(&self, token: &str) -> Result<Identity, ServiceError> {
        self.identity.verify(token).await.map_err(|e| {
            warn!("identity verification failed: {e}");
            metrics::counter!(IDENTITY_FAILURES_TOTAL, "reason" => e.reason()).increment(1);
            ServiceError::from(e)
        })
    }

    fn views(&self, bookings: Vec<Booking>) -> Vec<BookingView> {
        bookings
            .into_iter()
            .map(|booking| BookingView {
                scheduled_display: self.formatter.format_listing(booking.scheduled_at),
                booking,
            })
            .collect()
    }

    /// Fire-and-forget: the task is detached and its failure only logged.
    fn dispatch(&self, kind: NotificationKind, identity: &Identity, booking: &Booking) {
        let notification = Notification {
            contact_address: identity.contact_address.clone(),
            display_name: identity.display_name.clone(),
            service_name: booking.service_name.clone(),
            formatted_schedule: self.formatter.format_notification(booking.scheduled_at),
        };
        let notifier = self.notifier.clone();
        let booking_id = booking.id;
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(kind, &notification).await {
                warn!("dropping {} notification for booking {booking_id}: {e}", kind.as_str());
                metrics::counter!(NOTIFICATIONS_FAILED_TOTAL, "kind" => kind.as_str()).increment(1);
            }
        });
    }
}

async fn instrumented<T>(
    operation: &'static str,
    fut: impl Future<Output = Result<T, ServiceError>>,
) -> Result<T, ServiceError> {
    let start = Instant::now();
    let result = fut.await;
    metrics::counter!(
        observability::OPERATIONS_TOTAL,
        "operation" => operation,
        "status" => observability::status_label(&result)
    )
    .increment(1);
    metrics::histogram!(observability::OPERATION_DURATION_SECONDS, "operation" => operation)
        .record(start.elapsed().as_secs_f64());
    result
}
