//! Periodic idle sweep.
//!
//! The task holds only a weak handle, so dropping the last
//! [`InstanceManager`](super::InstanceManager) ends it at the next tick.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::instance_manager::WeakInstanceManager;

/// Spawn the sweep loop. The first sweep runs one `interval` after spawning.
pub(crate) fn spawn(manager: WeakInstanceManager, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(manager) = manager.upgrade() else {
                tracing::debug!("instance manager dropped, reaper exiting");
                return;
            };
            let stopped = manager.sweep_idle().await;
            if stopped > 0 {
                tracing::info!(stopped, "idle sweep finished");
            } else {
                tracing::debug!("idle sweep found nothing to reap");
            }
        }
    })
}
