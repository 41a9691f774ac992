//! Periodic expiry sweep.
//!
//! Runs [`VaultEngine::sweep_expired`] at a configurable interval. Removal
//! goes through the same delete path as token-based deletion, so a sweep
//! racing a client delete never double-reports.

use crate::engine::VaultEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Spawn the sweep loop as a tokio task. Send `true` on the returned
/// channel to shut it down.
pub fn spawn_sweep_loop(
    engine: Arc<VaultEngine>,
    interval: Duration,
) -> (tokio::task::JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "expiry sweep started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("expiry sweep shutting down");
                        return;
                    }
                }
            }

            match engine.sweep_expired().await {
                Ok(0) => debug!("expiry sweep: nothing to remove"),
                Ok(n) => info!(removed = n, "expiry sweep removed expired entries"),
                Err(e) => warn!(error = %e, "expiry sweep failed"),
            }
        }
    });

    (handle, shutdown_tx)
}
