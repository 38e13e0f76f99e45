//! Batch Coordinator Module
//!
//! Collects individually submitted work items into batches, dispatches
//! each batch to the processing function, and routes every result back to
//! its original caller.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::batch::{BatchProcessor, BatchSizePolicy, FixedBatchSize};
use crate::config::BatchConfig;
use crate::error::BatchError;

// == Work Item ==
/// One submitted payload plus its single-assignment result slot.
///
/// The slot is resolved exactly once: with the item's result, a batch
/// error, or `Cancelled`. Dropping an item without resolving it would
/// deadlock its caller, so every code path below accounts for it.
struct WorkItem<T, R> {
    payload: T,
    slot: oneshot::Sender<Result<R, BatchError>>,
}

// == Coordinator State ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Stopped,
    Running,
    Stopping,
}

struct Inner<T, R> {
    state: State,
    submit_tx: Option<mpsc::UnboundedSender<WorkItem<T, R>>>,
    drain_handle: Option<JoinHandle<()>>,
}

// == Batch Coordinator ==
/// Decouples "one caller submits one item" from "the processing function
/// operates on a list".
///
/// A single draining task forms batches and dispatches them one at a time:
/// a batch closes when it reaches the policy's size ceiling or when
/// `max_wait` has elapsed since its first item, whichever happens first.
/// Exactly one batch is in flight per coordinator.
pub struct BatchCoordinator<T, R> {
    processor: Arc<dyn BatchProcessor<T, R>>,
    policy: Arc<dyn BatchSizePolicy>,
    max_wait: Duration,
    inner: Mutex<Inner<T, R>>,
}

impl<T, R> BatchCoordinator<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    // == Constructors ==
    /// Creates a coordinator with a fixed batch-size ceiling.
    pub fn new(config: BatchConfig, processor: Arc<dyn BatchProcessor<T, R>>) -> Self {
        Self::with_policy(
            Arc::new(FixedBatchSize(config.max_batch_size)),
            config.max_wait,
            processor,
        )
    }

    /// Creates a coordinator with an explicit batch-size policy.
    pub fn with_policy(
        policy: Arc<dyn BatchSizePolicy>,
        max_wait: Duration,
        processor: Arc<dyn BatchProcessor<T, R>>,
    ) -> Self {
        Self {
            processor,
            policy,
            max_wait,
            inner: Mutex::new(Inner {
                state: State::Stopped,
                submit_tx: None,
                drain_handle: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T, R>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // == Start ==
    /// Spawns the batch-draining task. A no-op when already running.
    ///
    /// A fully stopped coordinator can be started again. When a concurrent
    /// [`stop`](Self::stop) is still draining, `start` waits for that
    /// shutdown to finish and then restarts, so the draining task is never
    /// duplicated.
    pub async fn start(&self) {
        loop {
            {
                let mut inner = self.lock();
                match inner.state {
                    State::Running => return,
                    State::Stopping => {} // a stop() is mid-shutdown
                    State::Stopped => {
                        let (tx, rx) = mpsc::unbounded_channel();
                        inner.submit_tx = Some(tx);
                        inner.state = State::Running;

                        let processor = Arc::clone(&self.processor);
                        let policy = Arc::clone(&self.policy);
                        let max_wait = self.max_wait;
                        inner.drain_handle =
                            Some(tokio::spawn(drain_loop(rx, processor, policy, max_wait)));
                        debug!("batch coordinator started");
                        return;
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    // == Stop ==
    /// Stops accepting submissions and waits for the in-flight batch.
    ///
    /// Items queued but not yet dispatched resolve with
    /// [`BatchError::Cancelled`]; a batch already handed to the processing
    /// function runs to completion.
    pub async fn stop(&self) {
        let handle = {
            let mut inner = self.lock();
            if inner.state != State::Running {
                return;
            }
            inner.state = State::Stopping;
            // Dropping the sender closes the channel and wakes the loop
            inner.submit_tx = None;
            inner.drain_handle.take()
        };

        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!("draining task ended abnormally: {}", err);
            }
        }

        // Only finish the transition this stop() began; a state moved on
        // by another caller in the meantime is left alone.
        let mut inner = self.lock();
        if inner.state == State::Stopping {
            inner.state = State::Stopped;
            debug!("batch coordinator stopped");
        }
    }

    // == Submit ==
    /// Submits one item and suspends until its batch is processed.
    ///
    /// Returns the item's result, the batch's error if processing failed,
    /// or [`BatchError::Cancelled`] if the coordinator stopped before the
    /// item's batch was dispatched.
    pub async fn submit(&self, payload: T) -> Result<R, BatchError> {
        let (slot, result_rx) = oneshot::channel();

        {
            let inner = self.lock();
            let tx = match (inner.state, inner.submit_tx.as_ref()) {
                (State::Running, Some(tx)) => tx,
                _ => return Err(BatchError::Cancelled),
            };
            if tx.send(WorkItem { payload, slot }).is_err() {
                return Err(BatchError::Cancelled);
            }
        }

        // The slot sender is never dropped unresolved by the loop, but a
        // recv error still maps to Cancelled rather than a panic.
        result_rx.await.unwrap_or(Err(BatchError::Cancelled))
    }
}

// == Draining Loop ==
/// Forms batches from the submission channel and dispatches them in order.
async fn drain_loop<T, R>(
    mut rx: mpsc::UnboundedReceiver<WorkItem<T, R>>,
    processor: Arc<dyn BatchProcessor<T, R>>,
    policy: Arc<dyn BatchSizePolicy>,
    max_wait: Duration,
) where
    T: Send + 'static,
    R: Send + 'static,
{
    loop {
        // Suspend until the first item of the next batch arrives
        let first = match rx.recv().await {
            Some(item) => item,
            None => break, // channel closed with nothing queued
        };

        let mut batch = vec![first];
        let ceiling = policy.current_max().max(1);
        let deadline = Instant::now() + max_wait;
        let mut channel_closed = false;

        // Fill until the ceiling or the wait deadline, whichever first
        while batch.len() < ceiling {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(item)) => batch.push(item),
                Ok(None) => {
                    channel_closed = true;
                    break;
                }
                Err(_) => break, // wait window elapsed
            }
        }

        if channel_closed && batch.len() < ceiling {
            // Coordinator is stopping; this batch was never dispatched
            trace!("cancelling {} queued items on shutdown", batch.len());
            for item in batch {
                let _ = item.slot.send(Err(BatchError::Cancelled));
            }
            break;
        }

        dispatch(batch, processor.as_ref(), policy.as_ref()).await;

        if channel_closed {
            break;
        }
    }
}

// == Dispatch ==
/// Runs one batch through the processing function and resolves every slot.
async fn dispatch<T, R>(
    batch: Vec<WorkItem<T, R>>,
    processor: &dyn BatchProcessor<T, R>,
    policy: &dyn BatchSizePolicy,
) where
    T: Send + 'static,
    R: Send + 'static,
{
    let (payloads, slots): (Vec<T>, Vec<oneshot::Sender<Result<R, BatchError>>>) =
        batch.into_iter().map(|item| (item.payload, item.slot)).unzip();
    let expected = payloads.len();

    let started = Instant::now();
    let outcome = processor.process(payloads).await;
    let latency = started.elapsed();
    policy.record_latency(latency);
    trace!("batch of {} processed in {:?}", expected, latency);

    match outcome {
        Ok(results) if results.len() == expected => {
            for (slot, result) in slots.into_iter().zip(results) {
                let _ = slot.send(Ok(result));
            }
        }
        Ok(results) => {
            warn!(
                "processing returned {} results for {} items, failing batch",
                results.len(),
                expected
            );
            let err = BatchError::LengthMismatch {
                expected,
                actual: results.len(),
            };
            for slot in slots {
                let _ = slot.send(Err(err.clone()));
            }
        }
        Err(err) => {
            warn!("batch processing failed: {}", err);
            let err = BatchError::Processing(err.to_string());
            for slot in slots {
                let _ = slot.send(Err(err.clone()));
            }
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use futures::future::join_all;

    fn doubling_processor() -> Arc<dyn BatchProcessor<u32, u32>> {
        Arc::new(crate::batch::FnProcessor(
            |items: Vec<u32>| -> anyhow::Result<Vec<u32>> {
                Ok(items.into_iter().map(|i| i * 2).collect())
            },
        ))
    }

    #[tokio::test]
    async fn test_single_batch_exact_size() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&invocations);
        let processor = Arc::new(crate::batch::FnProcessor(
            move |items: Vec<u32>| -> anyhow::Result<Vec<u32>> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(items.into_iter().map(|i| i + 1).collect())
            },
        ));

        let config = BatchConfig {
            max_batch_size: 4,
            max_wait: Duration::from_secs(5),
        };
        let coordinator = Arc::new(BatchCoordinator::new(config, processor));
        coordinator.start().await;

        let submissions = (0..4u32).map(|i| {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.submit(i).await })
        });
        let results: Vec<u32> = join_all(submissions)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();

        let mut sorted = results.clone();
        sorted.sort();
        assert_eq!(sorted, vec![1, 2, 3, 4]);
        assert_eq!(
            invocations.load(Ordering::SeqCst),
            1,
            "a full batch should be processed in one invocation"
        );

        coordinator.stop().await;
    }

    #[tokio::test]
    async fn test_batch_closes_on_wait_timeout() {
        let config = BatchConfig {
            max_batch_size: 100,
            max_wait: Duration::from_millis(50),
        };
        let coordinator = BatchCoordinator::new(config, doubling_processor());
        coordinator.start().await;

        let started = std::time::Instant::now();
        let result = coordinator.submit(21).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(result, 42);
        assert!(
            elapsed >= Duration::from_millis(40),
            "batch should wait for the timeout, took {:?}",
            elapsed
        );
        assert!(
            elapsed < Duration::from_millis(500),
            "batch should close shortly after the timeout, took {:?}",
            elapsed
        );

        coordinator.stop().await;
    }

    #[tokio::test]
    async fn test_result_order_matches_submission_order() {
        let processor = Arc::new(crate::batch::FnProcessor(
            |items: Vec<String>| -> anyhow::Result<Vec<String>> {
                Ok(items.into_iter().map(|s| format!("out:{}", s)).collect())
            },
        ));
        let config = BatchConfig {
            max_batch_size: 3,
            max_wait: Duration::from_secs(5),
        };
        let coordinator = Arc::new(BatchCoordinator::new(config, processor));
        coordinator.start().await;

        let mut handles = Vec::new();
        for name in ["a", "b", "c"] {
            let coordinator = Arc::clone(&coordinator);
            handles.push(tokio::spawn(async move {
                coordinator.submit(name.to_string()).await
            }));
            // Give each submission time to land in order
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let results: Vec<String> = join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();
        assert_eq!(results, vec!["out:a", "out:b", "out:c"]);

        coordinator.stop().await;
    }

    #[tokio::test]
    async fn test_processing_error_fails_whole_batch_then_recovers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let processor = Arc::new(crate::batch::FnProcessor(
            move |items: Vec<u32>| -> anyhow::Result<Vec<u32>> {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    anyhow::bail!("model backend unavailable");
                }
                Ok(items.into_iter().map(|i| i * 2).collect())
            },
        ));

        let config = BatchConfig {
            max_batch_size: 2,
            max_wait: Duration::from_millis(20),
        };
        let coordinator = Arc::new(BatchCoordinator::new(config, processor));
        coordinator.start().await;

        let (a, b) = tokio::join!(coordinator.submit(1), coordinator.submit(2));
        assert!(matches!(a, Err(BatchError::Processing(_))));
        assert!(matches!(b, Err(BatchError::Processing(_))));

        // The coordinator survives the failure and services the next batch
        let (c, d) = tokio::join!(coordinator.submit(3), coordinator.submit(4));
        let mut ok: Vec<u32> = vec![c.unwrap(), d.unwrap()];
        ok.sort();
        assert_eq!(ok, vec![6, 8]);

        coordinator.stop().await;
    }

    #[tokio::test]
    async fn test_length_mismatch_fails_batch() {
        let processor = Arc::new(crate::batch::FnProcessor(
            |items: Vec<u32>| -> anyhow::Result<Vec<u32>> {
                let mut results: Vec<u32> = items.into_iter().map(|i| i * 2).collect();
                results.pop(); // drop one result
                Ok(results)
            },
        ));
        let config = BatchConfig {
            max_batch_size: 2,
            max_wait: Duration::from_millis(20),
        };
        let coordinator = Arc::new(BatchCoordinator::new(config, processor));
        coordinator.start().await;

        let (a, b) = tokio::join!(coordinator.submit(1), coordinator.submit(2));
        for result in [a, b] {
            assert_eq!(
                result,
                Err(BatchError::LengthMismatch {
                    expected: 2,
                    actual: 1
                })
            );
        }

        coordinator.stop().await;
    }

    #[tokio::test]
    async fn test_submit_after_stop_is_cancelled() {
        let coordinator = BatchCoordinator::new(BatchConfig::default(), doubling_processor());
        coordinator.start().await;
        coordinator.stop().await;

        assert_eq!(coordinator.submit(1).await, Err(BatchError::Cancelled));
    }

    #[tokio::test]
    async fn test_submit_before_start_is_cancelled() {
        let coordinator = BatchCoordinator::new(BatchConfig::default(), doubling_processor());
        assert_eq!(coordinator.submit(1).await, Err(BatchError::Cancelled));
    }

    #[tokio::test]
    async fn test_stop_cancels_queued_item() {
        let config = BatchConfig {
            max_batch_size: 100,
            max_wait: Duration::from_secs(30),
        };
        let coordinator = Arc::new(BatchCoordinator::new(config, doubling_processor()));
        coordinator.start().await;

        let submitter = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.submit(1).await })
        };

        // Let the item reach the pending batch, then stop before it fills
        tokio::time::sleep(Duration::from_millis(20)).await;
        coordinator.stop().await;

        assert_eq!(submitter.await.unwrap(), Err(BatchError::Cancelled));
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_restartable() {
        let coordinator = BatchCoordinator::new(
            BatchConfig {
                max_batch_size: 1,
                max_wait: Duration::from_millis(10),
            },
            doubling_processor(),
        );

        coordinator.start().await;
        coordinator.start().await; // no-op
        assert_eq!(coordinator.submit(5).await.unwrap(), 10);

        coordinator.stop().await;
        coordinator.stop().await; // no-op

        // A stopped coordinator can be started again
        coordinator.start().await;
        assert_eq!(coordinator.submit(6).await.unwrap(), 12);
        coordinator.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_start_during_stop_leaves_coordinator_running() {
        let processor = Arc::new(crate::batch::FnProcessor(
            |items: Vec<u32>| -> anyhow::Result<Vec<u32>> {
                std::thread::sleep(Duration::from_millis(200));
                Ok(items.into_iter().map(|i| i * 2).collect())
            },
        ));
        let coordinator = Arc::new(BatchCoordinator::new(
            BatchConfig {
                max_batch_size: 1,
                max_wait: Duration::from_millis(10),
            },
            processor,
        ));
        coordinator.start().await;

        // Occupy the draining task with a slow batch, then stop mid-flight
        let in_flight = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.submit(1).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let stopper = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.stop().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Restart issued while stop() is still draining: it must not be
        // undone when the stop completes
        coordinator.start().await;

        assert_eq!(in_flight.await.unwrap(), Ok(2));
        stopper.await.unwrap();
        assert_eq!(
            coordinator.submit(3).await,
            Ok(6),
            "coordinator should accept work after the restart"
        );

        coordinator.stop().await;
    }
}
