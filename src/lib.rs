//! Pipecache - result caching and adaptive request batching
//!
//! Provides two cooperating subsystems for pipeline workloads:
//!
//! - A pluggable result cache behind the [`KeyedCache`] trait, with a
//!   bounded in-memory backend ([`InMemoryCache`], TTL + LRU eviction) and
//!   a disk-backed backend ([`PersistentCache`], size-bounded, durable
//!   across restarts).
//! - Request batching: [`BatchCoordinator`] collects items submitted by
//!   many concurrent callers into batches for a shared processing
//!   function, and [`AdaptiveBatchController`] tunes the batch size toward
//!   a latency target.

pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod tasks;

pub use batch::{
    AdaptiveBatchController, AdaptiveBatchSize, BatchCoordinator, BatchProcessor, BatchSizePolicy,
    FixedBatchSize, FnProcessor,
};
pub use cache::{CacheStats, InMemoryCache, KeyedCache, PersistentCache};
pub use config::{AdaptiveConfig, BatchConfig, Config};
pub use error::{BatchError, CacheError};
pub use tasks::spawn_cleanup_task;
