use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task per tenant: once enough appends have accumulated since
/// the last compaction, rewrite the WAL from live state.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            debug!("compactor idle: {appends}/{threshold} appends");
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("WAL compacted after {appends} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}
