//! Pull-based execution watcher.
//!
//! For backends without push delivery, [`PollWatcher`] fetches the
//! execution status on a fixed interval until a terminal status, the
//! attempt budget, or cancellation settles the watch. The fetch itself
//! goes through the [`StatusSource`] seam so the watcher stays
//! transport-agnostic (the production source is
//! [`ExecutionApi`](crate::api::ExecutionApi)).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use testwatch_core::status::{StatusClass, StatusSets};

use crate::config::PollConfig;
use crate::error::WatchError;
use crate::events::WatchEvent;

/// Broadcast channel capacity for poll progress events.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// One polled view of an execution's server-side status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub status: String,
    /// Completion percentage when the backend reports one.
    pub progress: Option<f64>,
    pub total_cases: Option<u32>,
    pub passed_cases: Option<u32>,
    pub failed_cases: Option<u32>,
    /// Name of the case currently running.
    pub current_case: Option<String>,
}

/// Seam over the status fetch.
///
/// `Err(WatchError::Network)` is retried without consuming the attempt
/// budget; every other error settles the watch immediately.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self, execution_id: &str) -> Result<StatusSnapshot, WatchError>;
}

#[async_trait]
impl<T: StatusSource + ?Sized> StatusSource for std::sync::Arc<T> {
    async fn fetch_status(&self, execution_id: &str) -> Result<StatusSnapshot, WatchError> {
        (**self).fetch_status(execution_id).await
    }
}

/// Polls one execution until settlement.
pub struct PollWatcher<S> {
    source: S,
    config: PollConfig,
    status_sets: StatusSets,
    events: broadcast::Sender<WatchEvent>,
}

impl<S: StatusSource> PollWatcher<S> {
    /// Create a watcher with the default API-domain status vocabulary.
    pub fn new(source: S, config: PollConfig) -> Self {
        Self::with_status_sets(source, config, StatusSets::default())
    }

    /// Create a watcher with a custom status vocabulary.
    pub fn with_status_sets(source: S, config: PollConfig, status_sets: StatusSets) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            source,
            config,
            status_sets,
            events,
        }
    }

    /// Subscribe to progress events emitted while watching.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }

    /// Watch one execution until it settles.
    ///
    /// Resolves with the terminal [`StatusSnapshot`], or fails with
    /// [`WatchError::Timeout`] once `max_attempts` successful fetches
    /// observed only in-progress statuses, [`WatchError::UnknownStatus`]
    /// on the first unmapped status, or [`WatchError::Cancelled`] when
    /// the token fires. Network faults are logged and retried without
    /// consuming the attempt budget, so flaky connectivity cannot
    /// exhaust it early.
    pub async fn watch(
        &self,
        execution_id: &str,
        cancel: &CancellationToken,
    ) -> Result<StatusSnapshot, WatchError> {
        let mut attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(WatchError::Cancelled);
            }

            let fetched = tokio::select! {
                _ = cancel.cancelled() => return Err(WatchError::Cancelled),
                result = self.source.fetch_status(execution_id) => result,
            };

            let snapshot = match fetched {
                Ok(snapshot) => snapshot,
                Err(WatchError::Network(reason)) => {
                    tracing::warn!(
                        execution_id,
                        error = %reason,
                        "Status fetch failed, retrying",
                    );
                    self.sleep_interval(cancel).await?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            attempts += 1;

            match self.status_sets.classify(&snapshot.status) {
                StatusClass::Terminal => {
                    tracing::info!(
                        execution_id,
                        status = %snapshot.status,
                        attempts,
                        "Execution reached terminal status",
                    );
                    return Ok(snapshot);
                }
                StatusClass::InProgress => {
                    let _ = self.events.send(WatchEvent::PollProgress {
                        execution_id: execution_id.to_string(),
                        snapshot: snapshot.clone(),
                    });

                    if attempts >= self.config.max_attempts {
                        tracing::error!(
                            execution_id,
                            attempts,
                            "Poll attempt budget exhausted",
                        );
                        return Err(WatchError::Timeout { attempts });
                    }
                    self.sleep_interval(cancel).await?;
                }
                StatusClass::Unrecognized => {
                    tracing::error!(
                        execution_id,
                        status = %snapshot.status,
                        "Unrecognized execution status",
                    );
                    return Err(WatchError::UnknownStatus {
                        status: snapshot.status,
                    });
                }
            }
        }
    }

    /// Sleep one interval, waking early on cancellation.
    async fn sleep_interval(&self, cancel: &CancellationToken) -> Result<(), WatchError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(WatchError::Cancelled),
            _ = tokio::time::sleep(self.config.interval) => Ok(()),
        }
    }
}
