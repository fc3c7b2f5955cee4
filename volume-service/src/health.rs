// SPDX-License-Identifier: GPL-3.0-only

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, warn};

use crate::engine::Engine;

/// Re-run the volume group check every `interval` so a group that went
/// inactive between requests is repaired. Failures are logged and retried
/// on the next tick.
pub fn spawn(engine: Arc<Engine>, interval: Duration) -> JoinHandle<()> {
    let span = tracing::info_span!("group_health", every = ?interval);
    tokio::spawn(
        async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; startup already checked.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match engine.ensure_volume_group().await {
                    Ok(()) => debug!("Volume group is healthy"),
                    Err(e) => warn!("Volume group check failed: {e}"),
                }
            }
        }
        .instrument(span),
    )
}
