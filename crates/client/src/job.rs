//! Job handles and the transport-dispatching watch facade.
//!
//! A [`JobHandle`] names one watched execution together with its
//! delivery mechanism and status vocabulary. [`WatchClient::watch`]
//! drives the handle over exactly one transport — push (WebSocket) or
//! pull (HTTP poll), never both — until settlement.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use testwatch_core::state::ExecutionState;
use testwatch_core::status::StatusSets;
use testwatch_core::types::ExecutionId;

use crate::api::ExecutionApi;
use crate::config::MonitorConfig;
use crate::connection::ExecutionMonitor;
use crate::error::WatchError;
use crate::events::WatchEvent;
use crate::poll::{PollWatcher, StatusSnapshot, StatusSource};

/// Delivery mechanism for one watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// WebSocket push stream.
    Push,
    /// HTTP status polling.
    Pull,
}

/// One watched execution: its id, transport, and the status vocabulary
/// considered terminal for its domain.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub execution_id: ExecutionId,
    pub transport: Transport,
    pub status_sets: StatusSets,
}

impl JobHandle {
    /// Watch over the WebSocket push stream.
    pub fn push(execution_id: impl Into<ExecutionId>) -> Self {
        Self {
            execution_id: execution_id.into(),
            transport: Transport::Push,
            status_sets: StatusSets::default(),
        }
    }

    /// Watch by polling the status endpoint.
    pub fn pull(execution_id: impl Into<ExecutionId>) -> Self {
        Self {
            execution_id: execution_id.into(),
            transport: Transport::Pull,
            status_sets: StatusSets::default(),
        }
    }

    /// Override the status vocabulary (e.g. the web-test domain).
    pub fn with_status_sets(mut self, status_sets: StatusSets) -> Self {
        self.status_sets = status_sets;
        self
    }
}

/// Settled result of a watch, shaped by the transport that drove it.
#[derive(Debug, Clone)]
pub enum WatchOutcome {
    /// Final reduced state from the push stream.
    Push(ExecutionState),
    /// Terminal snapshot from the poll loop.
    Poll(StatusSnapshot),
}

/// Entry point tying configuration, transports, and handles together.
pub struct WatchClient<S = Arc<ExecutionApi>> {
    config: MonitorConfig,
    source: S,
}

impl WatchClient {
    /// Build a client whose poll transport talks to the configured
    /// REST backend.
    pub fn new(config: MonitorConfig) -> Self {
        let api = Arc::new(ExecutionApi::new(config.api_base_url.clone()));
        Self {
            config,
            source: api,
        }
    }
}

impl<S: StatusSource + Clone> WatchClient<S> {
    /// Build a client over a custom status source.
    pub fn with_source(config: MonitorConfig, source: S) -> Self {
        Self { config, source }
    }

    /// Watch one job until settlement over its chosen transport.
    pub async fn watch(
        &self,
        handle: &JobHandle,
        cancel: &CancellationToken,
    ) -> Result<WatchOutcome, WatchError> {
        match handle.transport {
            Transport::Pull => {
                let watcher = PollWatcher::with_status_sets(
                    self.source.clone(),
                    self.config.poll.clone(),
                    handle.status_sets.clone(),
                );
                watcher
                    .watch(&handle.execution_id, cancel)
                    .await
                    .map(WatchOutcome::Poll)
            }
            Transport::Push => self.watch_push(handle, cancel).await,
        }
    }

    /// Drive a push watch: connect, follow state events to a terminal
    /// status, then disconnect.
    async fn watch_push(
        &self,
        handle: &JobHandle,
        cancel: &CancellationToken,
    ) -> Result<WatchOutcome, WatchError> {
        let monitor = ExecutionMonitor::new(self.config.connection.clone());
        let mut events = monitor.subscribe();
        monitor.connect(&handle.execution_id).await;

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Err(WatchError::Cancelled),
                event = events.recv() => match event {
                    Ok(WatchEvent::StateChanged { snapshot, .. })
                        if snapshot.status.is_terminal() =>
                    {
                        break Ok(WatchOutcome::Push(snapshot));
                    }
                    Ok(WatchEvent::ConnectionLost { attempts, .. }) => {
                        break Err(WatchError::Transport(format!(
                            "connection lost after {attempts} reconnect attempts"
                        )));
                    }
                    Ok(WatchEvent::Disconnected { .. }) => {
                        // A clean close before a terminal frame means the
                        // stream ended early. Abnormal drops arrive as
                        // `Reconnecting`/`ConnectionLost`, so keep
                        // listening through those.
                        break Err(WatchError::Transport(
                            "stream closed before a terminal status".into(),
                        ));
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            execution_id = %handle.execution_id,
                            skipped,
                            "Event stream lagged",
                        );
                    }
                    Err(RecvError::Closed) => {
                        break Err(WatchError::Transport("event stream closed".into()));
                    }
                },
            }
        };

        monitor.disconnect().await;
        result
    }
}
