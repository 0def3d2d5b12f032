//! Periodic removal of devices whose max-age elapsed.
//!
//! Devices that vanish without a byebye (power loss, network drop) would
//! otherwise stay in the registry until a client read it.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::registry::DeviceRegistry;
use crate::utils::now_millis;

/// Calls [`DeviceRegistry::sweep_expired`] on a fixed interval.
pub struct ExpirySweeper {
    registry: Arc<DeviceRegistry>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(registry: Arc<DeviceRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// Spawns the sweep loop on `tasks`.
    pub fn spawn(self, tasks: &TaskTracker, cancel: CancellationToken) {
        tasks.spawn(self.run(cancel));
    }

    /// Sweeps until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log::debug!("[Sweeper] Started (interval: {:?})", self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = self.registry.sweep_expired(now_millis());
                    if removed > 0 {
                        log::debug!("[Sweeper] Removed {} expired device(s)", removed);
                    }
                }
            }
        }

        log::debug!("[Sweeper] Stopped");
    }
}
