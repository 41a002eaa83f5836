//! Bounded-concurrency batch execution.
//!
//! [`BatchOrchestrator`] drives many independent case watches under a
//! concurrency cap. Items are processed in contiguous chunks of
//! `concurrency`: chunks run sequentially, items inside a chunk run
//! concurrently with a fan-in barrier at the chunk boundary. A slow
//! item therefore stalls its chunk rather than a sliding worker pool;
//! batches are small in practice, so the simpler barrier wins.
//!
//! One item's failure never fails the batch: every item settles into a
//! [`BatchItemOutcome`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use testwatch_core::types::CaseId;

use crate::api::ExecutionApi;
use crate::error::WatchError;
use crate::events::WatchEvent;
use crate::poll::{PollWatcher, StatusSnapshot};

/// Broadcast channel capacity for batch progress events.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Tunables for one batch run.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Items in flight at once (chunk size). Minimum 1.
    pub concurrency: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self { concurrency: 1 }
    }
}

/// Settled result of one batch item.
#[derive(Debug, Clone)]
pub struct BatchItemOutcome {
    pub case_id: CaseId,
    pub success: bool,
    /// Terminal snapshot when the watch resolved.
    pub result: Option<StatusSnapshot>,
    /// Settling error when it did not.
    pub error: Option<WatchError>,
}

/// Seam over "run one case to settlement".
///
/// The production implementation ([`SubmitThenPoll`]) submits the case
/// over REST and delegates to the poll watcher; tests substitute
/// scripted runners.
#[async_trait]
pub trait CaseRunner: Send + Sync {
    async fn run_case(
        &self,
        case_id: CaseId,
        cancel: &CancellationToken,
    ) -> Result<StatusSnapshot, WatchError>;
}

#[async_trait]
impl<T: CaseRunner + ?Sized> CaseRunner for Arc<T> {
    async fn run_case(
        &self,
        case_id: CaseId,
        cancel: &CancellationToken,
    ) -> Result<StatusSnapshot, WatchError> {
        (**self).run_case(case_id, cancel).await
    }
}

/// Production runner: submit the case, then poll its execution until
/// terminal.
pub struct SubmitThenPoll {
    api: Arc<ExecutionApi>,
    watcher: PollWatcher<Arc<ExecutionApi>>,
}

impl SubmitThenPoll {
    pub fn new(api: Arc<ExecutionApi>, watcher: PollWatcher<Arc<ExecutionApi>>) -> Self {
        Self { api, watcher }
    }
}

#[async_trait]
impl CaseRunner for SubmitThenPoll {
    async fn run_case(
        &self,
        case_id: CaseId,
        cancel: &CancellationToken,
    ) -> Result<StatusSnapshot, WatchError> {
        let execution_id = self.api.submit_case(case_id).await?;
        self.watcher.watch(&execution_id, cancel).await
    }
}

/// Drives batches of case runs with chunked concurrency.
pub struct BatchOrchestrator<R> {
    runner: R,
    events: broadcast::Sender<WatchEvent>,
}

impl<R: CaseRunner> BatchOrchestrator<R> {
    pub fn new(runner: R) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { runner, events }
    }

    /// Subscribe to batch progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }

    /// Run every case to settlement and aggregate the outcomes.
    ///
    /// Outcomes are ordered chunk-major, matching input order within a
    /// chunk. Cancellation settles the items not yet started with
    /// [`WatchError::Cancelled`]; items already in flight observe the
    /// token through their own watch.
    pub async fn run_batch(
        &self,
        case_ids: &[CaseId],
        options: &BatchOptions,
        cancel: &CancellationToken,
    ) -> Vec<BatchItemOutcome> {
        let total = case_ids.len();
        if total == 0 {
            return Vec::new();
        }

        let concurrency = options.concurrency.max(1);
        let completed = AtomicUsize::new(0);
        let mut outcomes = Vec::with_capacity(total);

        tracing::info!(total, concurrency, "Starting batch run");

        for chunk in case_ids.chunks(concurrency) {
            if cancel.is_cancelled() {
                break;
            }

            // Fan out the chunk; join_all preserves input order.
            let settled = futures::future::join_all(chunk.iter().map(|&case_id| {
                let completed = &completed;
                async move {
                    let result = self.runner.run_case(case_id, cancel).await;
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    let percent = ((done as f64 / total as f64) * 100.0).round() as u8;
                    let _ = self.events.send(WatchEvent::BatchProgress {
                        completed: done,
                        total,
                        percent,
                    });
                    (case_id, result)
                }
            }))
            .await;

            for (case_id, result) in settled {
                outcomes.push(match result {
                    Ok(snapshot) => BatchItemOutcome {
                        case_id,
                        success: true,
                        result: Some(snapshot),
                        error: None,
                    },
                    Err(e) => {
                        tracing::warn!(case_id, error = %e, "Batch item failed");
                        BatchItemOutcome {
                            case_id,
                            success: false,
                            result: None,
                            error: Some(e),
                        }
                    }
                });
            }
        }

        // Items never started because the batch was cancelled.
        for &case_id in &case_ids[outcomes.len()..] {
            outcomes.push(BatchItemOutcome {
                case_id,
                success: false,
                result: None,
                error: Some(WatchError::Cancelled),
            });
        }

        let succeeded = outcomes.iter().filter(|o| o.success).count();
        let failed = outcomes.len() - succeeded;
        tracing::info!(total, succeeded, failed, "Batch run finished");
        let _ = self.events.send(WatchEvent::BatchCompleted {
            total,
            succeeded,
            failed,
        });

        outcomes
    }
}
