//! Configuration Module
//!
//! Handles loading cache configuration from environment variables, plus
//! plain option structs for the batching components.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of entries the in-memory cache can hold
    pub max_entries: usize,
    /// Maximum total size of the persistent cache in bytes
    pub max_size_bytes: u64,
    /// Persistent cache directory (None = environment-derived default)
    pub cache_dir: Option<PathBuf>,
    /// Background cleanup task interval in seconds
    pub cleanup_interval: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `PIPECACHE_MAX_ENTRIES` - Maximum in-memory entries (default: 1000)
    /// - `PIPECACHE_MAX_SIZE_MB` - Persistent cache size limit in MB (default: 100)
    /// - `PIPECACHE_DIR` - Persistent cache directory (default: `<tmp>/pipecache`)
    /// - `PIPECACHE_CLEANUP_INTERVAL` - Cleanup frequency in seconds (default: 60)
    pub fn from_env() -> Self {
        Self {
            max_entries: env::var("PIPECACHE_MAX_ENTRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),
            max_size_bytes: env::var("PIPECACHE_MAX_SIZE_MB")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(|mb| mb * 1024 * 1024)
                .unwrap_or(100 * 1024 * 1024),
            cache_dir: env::var("PIPECACHE_DIR").ok().map(PathBuf::from),
            cleanup_interval: env::var("PIPECACHE_CLEANUP_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            max_size_bytes: 100 * 1024 * 1024,
            cache_dir: None,
            cleanup_interval: 60,
        }
    }
}

// == Batch Configuration ==
/// Options for a fixed-size [`BatchCoordinator`](crate::BatchCoordinator).
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum number of items in a batch
    pub max_batch_size: usize,
    /// Maximum time to wait for a batch to fill up after its first item
    pub max_wait: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 32,
            max_wait: Duration::from_millis(100),
        }
    }
}

// == Adaptive Configuration ==
/// Options for the adaptive batch-size controller.
#[derive(Debug, Clone)]
pub struct AdaptiveConfig {
    /// Starting batch size ceiling
    pub initial_size: usize,
    /// Lower bound for the tuned batch size
    pub min_size: usize,
    /// Upper bound for the tuned batch size
    pub max_size: usize,
    /// Per-batch processing latency the controller steers toward
    pub target_latency: Duration,
    /// Multiplicative factor applied when growing or shrinking
    pub adjustment_factor: f64,
    /// Number of recent batch latencies averaged for each adjustment
    pub window_size: usize,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            initial_size: 16,
            min_size: 1,
            max_size: 128,
            target_latency: Duration::from_millis(100),
            adjustment_factor: 1.2,
            window_size: 10,
        }
    }
}
