//! Error types for the caching and batching subsystems
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Errors raised internally by the persistent cache backend.
///
/// These never reach the public cache surface: a failed read or write
/// degrades to a cache miss and the entry is cleaned up. A cache miss
/// itself is an absent value (`None`), not an error.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Entry file or cache directory read/write failure
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata side-table could not be serialized or parsed
    #[error("cache metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

// == Batch Error Enum ==
/// Errors delivered to callers whose item was part of a failed batch.
///
/// Clone is required because a single batch-level failure fans out to the
/// result slot of every item in that batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    /// The processing function returned an error; every item in the batch
    /// receives this variant.
    #[error("batch processing failed: {0}")]
    Processing(String),

    /// The processing function returned the wrong number of results
    #[error("processing returned {actual} results for {expected} items")]
    LengthMismatch { expected: usize, actual: usize },

    /// The coordinator stopped before the item's batch was dispatched
    #[error("coordinator stopped before the item was dispatched")]
    Cancelled,
}

// == Result Type Alias ==
/// Convenience Result type for internal cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;
