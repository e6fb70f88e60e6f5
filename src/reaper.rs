use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::engine::Engine;

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(900);

/// Background task that periodically sweeps past blocked periods and
/// compacts the WAL once enough appends have accumulated.
pub async fn run_maintenance(engine: Arc<Engine>, compact_threshold: u64) {
    let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        tick(&engine, compact_threshold).await;
    }
}

/// One maintenance pass, separated out so tests can drive it directly.
pub async fn tick(engine: &Engine, compact_threshold: u64) {
    let today = match engine.today().await {
        Ok(today) => today,
        Err(e) => {
            // Provider vanished from the directory — nothing to sweep against.
            debug!("maintenance skip for {}: {e}", engine.provider_id);
            return;
        }
    };

    match engine.sweep_past_blocked(today).await {
        Ok(0) => {}
        Ok(swept) => {
            metrics::counter!(crate::observability::BLOCKED_SWEPT_TOTAL).increment(swept as u64);
            info!("swept {swept} past blocked periods for {}", engine.provider_id);
        }
        Err(e) => debug!("sweep failed for {}: {e}", engine.provider_id),
    }

    if engine.wal_appends_since_compact().await >= compact_threshold {
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL for {}", engine.provider_id),
            Err(e) => debug!("compaction failed for {}: {e}", engine.provider_id),
        }
    }
}
