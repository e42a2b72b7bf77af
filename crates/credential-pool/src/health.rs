//! Background health loop
//!
//! Runs one health cycle per interval: renews the coordinator's running
//! marker, clears elapsed quarantines, refreshes tokens approaching expiry
//! and evicts stale subject caches. Stops when the shutdown channel flips.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::coordinator::CredentialCoordinator;

/// Spawn the health loop for an owned pool.
///
/// The first tick fires immediately so a freshly started coordinator gets
/// its marker renewed and tokens checked without waiting a full interval.
pub fn spawn_health_loop(
    coordinator: Arc<CredentialCoordinator>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let period = coordinator.config().health_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        info!(period_secs = period.as_secs(), "health loop started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    coordinator.health_cycle().await;
                    debug!("health cycle complete");
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("health loop shutting down");
                        break;
                    }
                }
            }
        }
    })
}
