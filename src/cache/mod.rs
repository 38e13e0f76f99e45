//! Cache Module
//!
//! Pluggable result caching with TTL expiration and bounded eviction.
//! Two backends share one contract: [`InMemoryCache`] (entry-count bound,
//! LRU) and [`PersistentCache`] (byte-size bound, durable on disk).

mod entry;
mod memory;
mod order;
mod persistent;
mod stats;


// Re-export public types
pub use entry::CacheEntry;
pub use memory::InMemoryCache;
pub use persistent::PersistentCache;
pub use stats::CacheStats;

use std::time::Duration;

// == Keyed Cache Trait ==
/// Common contract for result cache backends.
///
/// Values are opaque owned bytes: the caller serializes and transfers
/// ownership on `set`, and gets a copy back on `get`. A miss is an absent
/// value, never an error; backend failures (I/O, corrupt metadata) also
/// degrade to a miss, because the cache is an optimization and must be
/// allowed to fail silently.
pub trait KeyedCache: Send + Sync {
    /// Returns the cached value, or None if absent or expired.
    fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Stores a value with an optional time-to-live.
    fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>);

    /// Checks whether a live (non-expired) entry exists for the key.
    fn has(&self, key: &str) -> bool;

    /// Removes an entry. Returns true if one was present.
    fn invalidate(&self, key: &str) -> bool;

    /// Removes every entry.
    fn clear(&self);

    /// Removes all expired entries, returning how many were dropped.
    fn purge_expired(&self) -> usize;

    /// Current number of live entries.
    fn len(&self) -> usize;

    /// Returns true if the cache holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the backend's performance counters.
    fn stats(&self) -> CacheStats;

    /// Returns the cached value, computing and storing it on a miss.
    ///
    /// Concurrent callers racing on the same missing key may each compute
    /// independently; collapsing duplicate work belongs to the batching
    /// layer, not the cache.
    fn get_or_compute<F>(&self, key: &str, ttl: Option<Duration>, compute: F) -> Vec<u8>
    where
        F: FnOnce() -> Vec<u8>,
        Self: Sized,
    {
        if let Some(value) = self.get(key) {
            return value;
        }
        let value = compute();
        self.set(key, value.clone(), ttl);
        value
    }
}
