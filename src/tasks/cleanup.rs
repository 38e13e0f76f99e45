//! TTL Cleanup Task
//!
//! Background task that periodically sweeps expired cache entries.
//! Complements the caches' lazy on-touch expiry: entries that are never
//! read again still get reclaimed.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::KeyedCache;

/// Spawns a background task that periodically purges expired entries.
///
/// The task loops forever, sleeping for `interval` between sweeps. The
/// caller owns both the cache and the returned handle; abort the handle
/// during shutdown. No global registry holds either.
///
/// # Example
/// ```ignore
/// let cache: Arc<dyn KeyedCache> = Arc::new(InMemoryCache::new(1000));
/// let handle = spawn_cleanup_task(cache.clone(), Duration::from_secs(60));
/// // Later, during shutdown:
/// handle.abort();
/// ```
pub fn spawn_cleanup_task(cache: Arc<dyn KeyedCache>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("starting TTL cleanup task, sweeping every {:?}", interval);

        loop {
            tokio::time::sleep(interval).await;

            let removed = cache.purge_expired();

            if removed > 0 {
                info!("TTL cleanup: removed {} expired entries", removed);
            } else {
                debug!("TTL cleanup: no expired entries found");
            }
        }
    })
}
