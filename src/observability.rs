use std::net::SocketAddr;

use metrics_exporter_prometheus::BuildError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: orchestrated operations. Labels: operation, status.
pub const OPERATIONS_TOTAL: &str = "booking_operations_total";

/// Histogram: operation latency in seconds, identity check included. Labels: operation.
pub const OPERATION_DURATION_SECONDS: &str = "booking_operation_duration_seconds";

/// Counter: failed identity verifications. Labels: reason.
pub const IDENTITY_FAILURES_TOTAL: &str = "booking_identity_failures_total";

/// Counter: notification deliveries that failed and were dropped. Labels: kind.
pub const NOTIFICATIONS_FAILED_TOTAL: &str = "booking_notifications_failed_total";

// ── Store metrics ───────────────────────────────────────────────

/// Counter: cancelled bookings purged by the retention cap.
pub const EVICTIONS_TOTAL: &str = "booking_evictions_total";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "booking_wal_compactions_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "booking_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "booking_wal_flush_batch_size";

/// Install the fmt tracing subscriber. A no-op if one is already installed.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init_metrics(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Status label for [`OPERATIONS_TOTAL`].
pub fn status_label<T, E>(result: &Result<T, E>) -> &'static str {
    if result.is_ok() { "ok" } else { "error" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_disabled_without_port() {
        assert!(init_metrics(None).is_ok());
    }

    #[test]
    fn status_labels() {
        assert_eq!(status_label::<(), ()>(&Ok(())), "ok");
        assert_eq!(status_label::<(), &str>(&Err("boom")), "error");
    }

    #[test]
    fn tracing_init_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
