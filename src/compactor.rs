use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::store::{BookingStore, StoreError};

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that compacts the WAL whenever enough appends pile up.
/// A threshold of 0 disables compaction.
pub async fn run_compactor(store: Arc<BookingStore>, threshold: u64) {
    if threshold == 0 {
        return;
    }
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_needed(&store, threshold).await {
            error!("WAL compaction failed: {e}");
        }
    }
}

/// Compact once if at least `threshold` appends happened since the last
/// compaction. Returns the number of records written, if it ran.
pub async fn compact_if_needed(store: &BookingStore, threshold: u64) -> Result<Option<usize>, StoreError> {
    let appends = store.wal_appends_since_compact().await;
    if appends < threshold.max(1) {
        return Ok(None);
    }
    let written = store.compact_wal().await?;
    info!("compacted WAL: {appends} appends since last compaction, {written} records kept");
    metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
    Ok(Some(written))
}
