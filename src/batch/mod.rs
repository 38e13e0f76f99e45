//! Batch Module
//!
//! Groups work items submitted by many concurrent callers into batches for
//! a shared processing function, and optionally tunes the batch size
//! toward a latency target.
//!
//! The processing function is the seam to the rest of the pipeline (LLM
//! calls, audio transforms); the coordinator only guarantees per-item
//! result delivery and batch-level failure isolation.

mod adaptive;
mod coordinator;

// Re-export public types
pub use adaptive::{AdaptiveBatchController, AdaptiveBatchSize};
pub use coordinator::BatchCoordinator;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

// == Batch Processor Trait ==
/// Caller-supplied function applied to each closed batch.
///
/// Must return exactly one result per item, in the order the items were
/// given; any error (or a length mismatch) fails the whole batch, because
/// the coordinator cannot know the function's partial-failure semantics.
#[async_trait]
pub trait BatchProcessor<T, R>: Send + Sync {
    async fn process(&self, items: Vec<T>) -> Result<Vec<R>>;
}

// == Fn Processor ==
/// Adapts a plain synchronous closure into a [`BatchProcessor`].
pub struct FnProcessor<F>(pub F);

#[async_trait]
impl<T, R, F> BatchProcessor<T, R> for FnProcessor<F>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(Vec<T>) -> Result<Vec<R>> + Send + Sync,
{
    async fn process(&self, items: Vec<T>) -> Result<Vec<R>> {
        (self.0)(items)
    }
}

// == Batch Size Policy ==
/// Source of the batch-size ceiling used when closing batches.
///
/// Two implementations are selected at construction time: a fixed ceiling
/// ([`FixedBatchSize`]) and a latency-feedback-tuned one
/// ([`AdaptiveBatchSize`]).
pub trait BatchSizePolicy: Send + Sync {
    /// Ceiling applied to the next batch being formed.
    fn current_max(&self) -> usize;

    /// Feeds the observed processing latency of a completed batch back
    /// into the policy. The default implementation ignores it.
    fn record_latency(&self, latency: Duration) {
        let _ = latency;
    }
}

/// Static batch-size ceiling.
#[derive(Debug)]
pub struct FixedBatchSize(pub usize);

impl BatchSizePolicy for FixedBatchSize {
    fn current_max(&self) -> usize {
        self.0
    }
}
