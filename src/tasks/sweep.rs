//! Sweep Task
//!
//! Background task that periodically removes expired cache entries.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::Cache;

/// Spawns a background task that periodically calls [`Cache::clean`].
///
/// Driver operations block, so each sweep runs on tokio's blocking pool.
///
/// # Arguments
/// * `cache` - Shared cache facade
/// * `sweep_interval_secs` - Interval in seconds between sweeps
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
///
/// # Example
/// ```ignore
/// let cache = Arc::new(Cache::from_config(&config)?);
/// let sweep_handle = spawn_sweep_task(cache.clone(), 60);
/// // Later, during shutdown:
/// sweep_handle.abort();
/// ```
pub fn spawn_sweep_task(cache: Arc<Cache>, sweep_interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(sweep_interval_secs);

    tokio::spawn(async move {
        info!(
            "Starting sweep task with interval of {} seconds",
            sweep_interval_secs
        );

        loop {
            tokio::time::sleep(interval).await;

            let cache = cache.clone();
            match tokio::task::spawn_blocking(move || cache.clean()).await {
                Ok(true) => debug!("Sweep completed"),
                Ok(false) => warn!("Sweep did not complete, cache disabled or backend unavailable"),
                Err(e) => warn!(error = %e, "Sweep worker failed"),
            }
        }
    })
}
