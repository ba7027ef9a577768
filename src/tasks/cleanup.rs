//! Maintenance Task
//!
//! Background task that periodically sweeps the store and trims page state.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::context::CacheContext;

/// Spawns a background task that runs [`CacheContext::maintain`] every
/// `interval`.
///
/// The first pass runs one interval after spawning. Abort the returned
/// handle during shutdown.
///
/// # Example
/// ```ignore
/// let ctx = CacheContext::in_memory(Config::default());
/// let cleanup_handle = spawn_cleanup_task(ctx.clone(), Duration::from_secs(600));
/// // Later, during shutdown:
/// cleanup_handle.abort();
/// ```
pub fn spawn_cleanup_task(context: CacheContext, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(?interval, "Starting cache maintenance task");

        loop {
            tokio::time::sleep(interval).await;

            let report = context.maintain().await;
            if report.expired + report.evicted + report.page_states_removed > 0 {
                info!(
                    expired = report.expired,
                    evicted = report.evicted,
                    page_states = report.page_states_removed,
                    "Cache maintenance removed entries"
                );
            } else {
                debug!("Cache maintenance: nothing to remove");
            }
        }
    })
}
