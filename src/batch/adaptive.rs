//! Adaptive Batching Module
//!
//! Tunes the batch-size ceiling from observed batch latency: after each
//! completed batch the recent-latency average is compared against a target
//! and the ceiling grows or shrinks multiplicatively, with a dead-band
//! around the target to prevent oscillation.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::debug;

use crate::batch::{BatchCoordinator, BatchProcessor, BatchSizePolicy};
use crate::config::AdaptiveConfig;
use crate::error::BatchError;

// == Constants ==
/// Tolerance around the target latency within which no adjustment is made
const DEAD_BAND: f64 = 0.1;

// == Adaptive Batch Size ==
/// Latency-feedback batch-size policy.
///
/// Keeps a rolling window of the most recent batch latencies. The tuned
/// ceiling is read by the draining loop through an atomic and is only
/// mutated after a batch completes, so in-flight batch composition is
/// never affected.
pub struct AdaptiveBatchSize {
    config: AdaptiveConfig,
    /// Current target batch size, clamped to [min_size, max_size]
    current: AtomicUsize,
    /// Rolling window of recent batch latencies
    window: Mutex<VecDeque<Duration>>,
}

impl AdaptiveBatchSize {
    /// Creates a policy starting at `config.initial_size`.
    pub fn new(config: AdaptiveConfig) -> Self {
        let initial = config.initial_size.clamp(config.min_size, config.max_size);
        Self {
            config,
            current: AtomicUsize::new(initial),
            window: Mutex::new(VecDeque::new()),
        }
    }
}

impl BatchSizePolicy for AdaptiveBatchSize {
    fn current_max(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    // == Adjustment ==
    /// Records a batch latency and adjusts the ceiling.
    ///
    /// avg > target * (1 + DEAD_BAND): shrink to
    /// `max(min_size, floor(current / factor))`; avg below the band grows
    /// to `min(max_size, ceil(current * factor))`; inside the band the
    /// size is left alone.
    fn record_latency(&self, latency: Duration) {
        let avg_latency = {
            let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
            window.push_back(latency);
            if window.len() > self.config.window_size {
                window.pop_front();
            }
            window.iter().sum::<Duration>().as_secs_f64() / window.len() as f64
        };

        let target = self.config.target_latency.as_secs_f64();
        let current = self.current.load(Ordering::Relaxed);

        let new_size = if avg_latency > target * (1.0 + DEAD_BAND) {
            // Too slow: shrink
            ((current as f64 / self.config.adjustment_factor).floor() as usize)
                .max(self.config.min_size)
        } else if avg_latency < target * (1.0 - DEAD_BAND) {
            // Too fast: grow
            ((current as f64 * self.config.adjustment_factor).ceil() as usize)
                .min(self.config.max_size)
        } else {
            return; // inside the dead-band
        };

        if new_size != current {
            self.current.store(new_size, Ordering::Relaxed);
            debug!(
                "batch size {} -> {} (avg latency {:.1}ms, target {:.1}ms)",
                current,
                new_size,
                avg_latency * 1000.0,
                target * 1000.0
            );
        }
    }
}

// == Adaptive Batch Controller ==
/// A [`BatchCoordinator`] whose batch-size ceiling tracks a latency goal.
pub struct AdaptiveBatchController<T, R> {
    coordinator: BatchCoordinator<T, R>,
    policy: Arc<AdaptiveBatchSize>,
}

impl<T, R> AdaptiveBatchController<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    // == Constructor ==
    /// Creates a controller with the default wait window of half the
    /// target latency.
    pub fn new(config: AdaptiveConfig, processor: Arc<dyn BatchProcessor<T, R>>) -> Self {
        let max_wait = config.target_latency / 2;
        Self::with_max_wait(config, max_wait, processor)
    }

    /// Creates a controller with an explicit wait window.
    pub fn with_max_wait(
        config: AdaptiveConfig,
        max_wait: Duration,
        processor: Arc<dyn BatchProcessor<T, R>>,
    ) -> Self {
        let policy = Arc::new(AdaptiveBatchSize::new(config));
        let coordinator = BatchCoordinator::with_policy(
            Arc::clone(&policy) as Arc<dyn BatchSizePolicy>,
            max_wait,
            processor,
        );
        Self {
            coordinator,
            policy,
        }
    }

    /// Starts the underlying coordinator.
    pub async fn start(&self) {
        self.coordinator.start().await;
    }

    /// Stops the underlying coordinator.
    pub async fn stop(&self) {
        self.coordinator.stop().await;
    }

    /// Submits one item for adaptively batched processing.
    pub async fn submit(&self, payload: T) -> Result<R, BatchError> {
        self.coordinator.submit(payload).await
    }

    /// The ceiling that will be applied to subsequently formed batches.
    pub fn current_target_size(&self) -> usize {
        self.policy.current_max()
    }
}
