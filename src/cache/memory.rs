//! In-Memory Cache Module
//!
//! Bounded, thread-safe map with per-entry TTL and LRU eviction.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

use crate::cache::order::AccessOrder;
use crate::cache::{CacheEntry, CacheStats, KeyedCache};

// == In-Memory Cache ==
/// Entry-count-bounded cache with TTL expiration and LRU eviction.
///
/// A single mutex serializes every operation; this backend targets
/// low-to-moderate-throughput memoization, not a hot path, so simplicity
/// wins over lock striping.
#[derive(Debug)]
pub struct InMemoryCache {
    /// Maximum number of entries allowed
    max_entries: usize,
    inner: Mutex<MemoryInner>,
}

#[derive(Debug)]
struct MemoryInner {
    /// Key-value storage
    entries: HashMap<String, CacheEntry>,
    /// Recency tracking for eviction
    order: AccessOrder,
    /// Performance statistics
    stats: CacheStats,
}

impl InMemoryCache {
    // == Constructor ==
    /// Creates a cache holding at most `max_entries` entries.
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            inner: Mutex::new(MemoryInner {
                entries: HashMap::new(),
                order: AccessOrder::new(),
                stats: CacheStats::new(),
            }),
        }
    }

    /// Acquires the cache lock, recovering from poisoning.
    ///
    /// The cache never holds invariant-breaking intermediate state across
    /// a panic point, so a poisoned lock is safe to reclaim.
    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MemoryInner {
    /// Drops an entry and its recency record.
    fn remove_entry(&mut self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.order.forget(key);
            self.stats.set_total_entries(self.entries.len());
        }
        removed
    }
}

impl KeyedCache for InMemoryCache {
    // == Get ==
    /// Returns the value if present and not expired.
    ///
    /// An expired entry is purged on touch and reported as absent.
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut inner = self.lock();

        let expired = match inner.entries.get(key) {
            Some(entry) => entry.is_expired(),
            None => {
                inner.stats.record_miss();
                return None;
            }
        };

        if expired {
            inner.remove_entry(key);
            inner.stats.record_expiration();
            inner.stats.record_miss();
            return None;
        }

        inner.stats.record_hit();
        inner.order.mark_used(key);
        inner.entries.get_mut(key).map(|entry| {
            entry.touch();
            entry.value.clone()
        })
    }

    // == Set ==
    /// Stores a key-value pair with optional TTL.
    ///
    /// Overwriting an existing key resets its TTL. Inserting a new key at
    /// capacity evicts the least recently used entry first.
    fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        let mut inner = self.lock();

        let is_overwrite = inner.entries.contains_key(key);
        if !is_overwrite && self.max_entries > 0 && inner.entries.len() >= self.max_entries {
            if let Some(evicted) = inner.order.pop_lru() {
                inner.entries.remove(&evicted);
                inner.stats.record_eviction();
                debug!("evicted LRU entry '{}' to admit '{}'", evicted, key);
            }
        }

        inner.entries.insert(key.to_string(), CacheEntry::new(value, ttl));
        inner.order.mark_used(key);
        let len = inner.entries.len();
        inner.stats.set_total_entries(len);
        debug_assert_eq!(
            inner.order.len(),
            len,
            "every stored key has exactly one recency record"
        );
    }

    // == Has ==
    fn has(&self, key: &str) -> bool {
        let mut inner = self.lock();

        let expired = match inner.entries.get(key) {
            Some(entry) => entry.is_expired(),
            None => return false,
        };

        if expired {
            inner.remove_entry(key);
            inner.stats.record_expiration();
            return false;
        }
        true
    }

    // == Invalidate ==
    fn invalidate(&self, key: &str) -> bool {
        self.lock().remove_entry(key)
    }

    // == Clear ==
    fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.order.clear();
        inner.stats.set_total_entries(0);
    }

    // == Purge Expired ==
    /// Removes every expired entry, returning the count removed.
    fn purge_expired(&self) -> usize {
        let mut inner = self.lock();

        let expired_keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            inner.remove_entry(key);
            inner.stats.record_expiration();
        }
        expired_keys.len()
    }

    fn len(&self) -> usize {
        self.lock().entries.len()
    }

    // == Stats ==
    fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let mut stats = inner.stats.clone();
        stats.set_total_entries(inner.entries.len());
        stats
    }
}
