//! Persistent Cache Module
//!
//! Disk-backed cache with a JSON metadata side-table and size-bounded
//! eviction. Entries survive process restarts.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::cache::entry::current_timestamp_ms;
use crate::cache::{CacheStats, KeyedCache};
use crate::config::Config;
use crate::error::CacheResult;

// == Constants ==
/// Metadata side-table file name inside the cache directory
const METADATA_FILE: &str = "metadata.json";

/// After eviction, usage is driven down to this fraction of the size
/// limit so that inserts near the boundary do not evict on every call.
const EVICT_TO_FRACTION: f64 = 0.8;

// == Metadata ==
/// Per-entry bookkeeping persisted in the metadata side-table.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryMeta {
    created_at: u64,
    last_access_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<u64>,
    size_bytes: u64,
}

impl EntryMeta {
    fn is_expired(&self) -> bool {
        matches!(self.expires_at, Some(expires) if current_timestamp_ms() >= expires)
    }
}

/// Mapping key -> entry metadata, serialized as one JSON file.
///
/// Invariant: every key in the table has a backing entry file and vice
/// versa. Divergence (crash between writes, external deletion) is treated
/// as a miss and the surviving side is cleaned up.
#[derive(Debug, Default, Serialize, Deserialize)]
struct MetadataTable {
    items: HashMap<String, EntryMeta>,
}

// == Persistent Cache ==
/// File-backed cache bounded by total value size in bytes.
///
/// Each entry is stored in a file named by the SHA-256 hex digest of its
/// key; a single `metadata.json` records timestamps and sizes and is
/// rewritten in full under the cache lock on every mutation.
///
/// Known limitation: one process per cache directory. Operations are
/// serialized within a process, but no cross-process file locking is
/// performed.
#[derive(Debug)]
pub struct PersistentCache {
    /// Cache directory holding entry files and the metadata table
    root: PathBuf,
    /// Maximum total tracked value size in bytes
    max_size_bytes: u64,
    inner: Mutex<PersistentInner>,
}

#[derive(Debug)]
struct PersistentInner {
    table: MetadataTable,
    stats: CacheStats,
}

impl PersistentCache {
    // == Constructor ==
    /// Opens (or creates) a cache rooted at `cache_dir`.
    ///
    /// When `cache_dir` is None the directory comes from `PIPECACHE_DIR`,
    /// falling back to `pipecache` under the system temp directory. The
    /// directory is created if absent. Metadata entries whose backing file
    /// is missing are discarded on open; an unreadable metadata file
    /// resets the cache to empty.
    pub fn open(cache_dir: Option<PathBuf>, max_size_bytes: u64) -> CacheResult<Self> {
        let root = cache_dir.unwrap_or_else(default_cache_dir);
        fs::create_dir_all(&root)?;

        let mut table = load_metadata(&root);

        // Discard metadata for entries whose backing file disappeared
        let before = table.items.len();
        table
            .items
            .retain(|key, _| root.join(hash_key(key)).exists());
        let pruned = before - table.items.len();

        let mut stats = CacheStats::new();
        stats.set_total_entries(table.items.len());

        let cache = Self {
            root,
            max_size_bytes,
            inner: Mutex::new(PersistentInner { table, stats }),
        };

        if pruned > 0 {
            warn!("discarded {} cache entries with missing files", pruned);
            let inner = cache.lock();
            if let Err(err) = cache.save_metadata(&inner.table) {
                warn!("failed to persist pruned metadata: {}", err);
            }
        }

        debug!(
            "opened persistent cache at {} ({} entries)",
            cache.root.display(),
            cache.lock().table.items.len()
        );
        Ok(cache)
    }

    /// Opens a cache using directory and size limit from a [`Config`].
    pub fn open_with_config(config: &Config) -> CacheResult<Self> {
        Self::open(config.cache_dir.clone(), config.max_size_bytes)
    }

    /// Acquires the cache lock, recovering from poisoning.
    fn lock(&self) -> MutexGuard<'_, PersistentInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Path of the entry file for a key (content-addressed).
    fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(hash_key(key))
    }

    /// Rewrites the metadata side-table in full.
    fn save_metadata(&self, table: &MetadataTable) -> CacheResult<()> {
        let payload = serde_json::to_vec(table)?;
        fs::write(self.root.join(METADATA_FILE), payload)?;
        Ok(())
    }

    // == Read Path ==
    /// Loads an entry, purging it when expired or orphaned.
    fn read_entry(&self, inner: &mut PersistentInner, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let meta = match inner.table.items.get(key) {
            Some(meta) => meta.clone(),
            None => {
                inner.stats.record_miss();
                return Ok(None);
            }
        };

        if meta.is_expired() {
            self.drop_entry(inner, key);
            inner.stats.record_expiration();
            inner.stats.record_miss();
            return Ok(None);
        }

        let value = match fs::read(self.entry_path(key)) {
            Ok(value) => value,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                // Orphaned metadata: file vanished out from under us
                self.drop_entry(inner, key);
                inner.stats.record_miss();
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        if let Some(meta) = inner.table.items.get_mut(key) {
            meta.last_access_at = current_timestamp_ms();
        }
        self.save_metadata(&inner.table)?;
        inner.stats.record_hit();
        Ok(Some(value))
    }

    // == Write Path ==
    /// Writes an entry file and records it in the metadata table.
    ///
    /// The value is fully buffered before the single write to the final
    /// path, so readers never observe a truncated entry.
    fn write_entry(
        &self,
        inner: &mut PersistentInner,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        self.ensure_space(inner);

        fs::write(self.entry_path(key), &value)?;

        let now = current_timestamp_ms();
        let meta = EntryMeta {
            created_at: now,
            last_access_at: now,
            expires_at: ttl.map(|ttl| now + ttl.as_millis() as u64),
            size_bytes: value.len() as u64,
        };
        inner.table.items.insert(key.to_string(), meta);
        let len = inner.table.items.len();
        inner.stats.set_total_entries(len);
        self.save_metadata(&inner.table)
    }

    // == Ensure Space ==
    /// Evicts oldest-accessed entries while total size exceeds the limit.
    ///
    /// Eviction stops once usage drops to `EVICT_TO_FRACTION` of the
    /// limit. Ties on the access timestamp are broken by key so the order
    /// is deterministic.
    fn ensure_space(&self, inner: &mut PersistentInner) {
        let mut total: u64 = inner.table.items.values().map(|m| m.size_bytes).sum();
        if total <= self.max_size_bytes {
            return;
        }

        let floor = (self.max_size_bytes as f64 * EVICT_TO_FRACTION) as u64;
        let mut candidates: Vec<(u64, String, u64)> = inner
            .table
            .items
            .iter()
            .map(|(key, meta)| (meta.last_access_at, key.clone(), meta.size_bytes))
            .collect();
        candidates.sort();

        let mut evicted = 0usize;
        for (_, key, size) in candidates {
            self.remove_entry_file(&key);
            inner.table.items.remove(&key);
            inner.stats.record_eviction();
            evicted += 1;
            total = total.saturating_sub(size);
            if total <= floor {
                break;
            }
        }

        let len = inner.table.items.len();
        inner.stats.set_total_entries(len);
        debug!("evicted {} entries to reclaim space ({} bytes in use)", evicted, total);
        if let Err(err) = self.save_metadata(&inner.table) {
            warn!("failed to persist metadata after eviction: {}", err);
        }
    }

    /// Unlinks an entry file, tolerating its absence.
    fn remove_entry_file(&self, key: &str) {
        if let Err(err) = fs::remove_file(self.entry_path(key)) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove cache file for '{}': {}", key, err);
            }
        }
    }

    /// Removes an entry from disk and metadata. Returns true if it was tracked.
    fn drop_entry(&self, inner: &mut PersistentInner, key: &str) -> bool {
        self.remove_entry_file(key);
        let removed = inner.table.items.remove(key).is_some();
        if removed {
            let len = inner.table.items.len();
            inner.stats.set_total_entries(len);
            if let Err(err) = self.save_metadata(&inner.table) {
                warn!("failed to persist metadata after removal: {}", err);
            }
        }
        removed
    }
}

impl KeyedCache for PersistentCache {
    // == Get ==
    /// Returns the stored value, or None if absent, expired, or orphaned.
    ///
    /// A read failure degrades to a miss and the entry is cleaned up.
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut inner = self.lock();
        match self.read_entry(&mut inner, key) {
            Ok(value) => value,
            Err(err) => {
                warn!("cache read for '{}' failed, treating as miss: {}", key, err);
                inner.stats.record_miss();
                self.drop_entry(&mut inner, key);
                None
            }
        }
    }

    // == Set ==
    /// Durably stores a value. A write failure drops the entry entirely
    /// rather than leaving file and metadata out of step.
    fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        let mut inner = self.lock();
        if let Err(err) = self.write_entry(&mut inner, key, value, ttl) {
            warn!("cache write for '{}' failed, entry dropped: {}", key, err);
            self.drop_entry(&mut inner, key);
        }
    }

    // == Has ==
    fn has(&self, key: &str) -> bool {
        let mut inner = self.lock();

        let expired = match inner.table.items.get(key) {
            Some(meta) => meta.is_expired(),
            None => return false,
        };

        if expired {
            self.drop_entry(&mut inner, key);
            inner.stats.record_expiration();
            return false;
        }

        if !self.entry_path(key).exists() {
            self.drop_entry(&mut inner, key);
            return false;
        }
        true
    }

    // == Invalidate ==
    fn invalidate(&self, key: &str) -> bool {
        let mut inner = self.lock();
        self.drop_entry(&mut inner, key)
    }

    // == Clear ==
    fn clear(&self) {
        let mut inner = self.lock();
        let keys: Vec<String> = inner.table.items.keys().cloned().collect();
        for key in keys {
            self.remove_entry_file(&key);
        }
        inner.table.items.clear();
        inner.stats.set_total_entries(0);
        if let Err(err) = self.save_metadata(&inner.table) {
            warn!("failed to persist metadata after clear: {}", err);
        }
    }

    // == Purge Expired ==
    fn purge_expired(&self) -> usize {
        let mut inner = self.lock();

        let expired_keys: Vec<String> = inner
            .table
            .items
            .iter()
            .filter(|(_, meta)| meta.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            self.remove_entry_file(key);
            inner.table.items.remove(key);
            inner.stats.record_expiration();
        }

        if !expired_keys.is_empty() {
            let len = inner.table.items.len();
            inner.stats.set_total_entries(len);
            if let Err(err) = self.save_metadata(&inner.table) {
                warn!("failed to persist metadata after purge: {}", err);
            }
        }
        expired_keys.len()
    }

    fn len(&self) -> usize {
        self.lock().table.items.len()
    }

    // == Stats ==
    fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let mut stats = inner.stats.clone();
        stats.set_total_entries(inner.table.items.len());
        stats
    }
}

// == Utility Functions ==
/// Content-addressed file name for a key: lowercase hex SHA-256.
fn hash_key(key: &str) -> String {
    Sha256::digest(key.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Environment-derived default cache directory.
fn default_cache_dir() -> PathBuf {
    std::env::var_os("PIPECACHE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("pipecache"))
}

/// Loads the metadata table, falling back to empty on any failure.
fn load_metadata(root: &std::path::Path) -> MetadataTable {
    let path = root.join(METADATA_FILE);
    if !path.exists() {
        return MetadataTable::default();
    }
    let raw = match fs::read(&path) {
        Ok(raw) => raw,
        Err(err) => {
            warn!("unreadable cache metadata, starting empty: {}", err);
            return MetadataTable::default();
        }
    };
    match serde_json::from_slice(&raw) {
        Ok(table) => table,
        Err(err) => {
            warn!("corrupt cache metadata, starting empty: {}", err);
            MetadataTable::default()
        }
    }
}
