//! Events published by the monitoring transports.
//!
//! Every transport broadcasts [`WatchEvent`]s over a
//! [`tokio::sync::broadcast`] channel. Subscribers (UI bindings,
//! loggers) register via the owning component's `subscribe()` instead
//! of passing progress callbacks into each call.

use serde::Serialize;
use testwatch_core::state::ExecutionState;
use testwatch_core::types::ExecutionId;

use crate::poll::StatusSnapshot;

/// A monitoring event, tagged with the execution or batch it concerns.
#[derive(Debug, Clone, Serialize)]
pub enum WatchEvent {
    /// The WebSocket connection for an execution was established.
    Connected { execution_id: ExecutionId },

    /// The stream closed cleanly; no reconnect will follow.
    Disconnected { execution_id: ExecutionId },

    /// The connection dropped abnormally; a reconnect is scheduled.
    Reconnecting {
        execution_id: ExecutionId,
        attempt: u32,
    },

    /// A non-fatal transport fault (receive error, failed send). The
    /// session ends and the reconnect policy decides what happens next.
    TransportError {
        execution_id: ExecutionId,
        detail: String,
    },

    /// Reconnect attempts are exhausted; the watch will not recover
    /// without a fresh `connect()`.
    ConnectionLost {
        execution_id: ExecutionId,
        attempts: u32,
    },

    /// The execution state machine transitioned; carries the full
    /// post-transition snapshot.
    StateChanged {
        execution_id: ExecutionId,
        snapshot: ExecutionState,
    },

    /// A poll cycle observed the execution still in progress.
    PollProgress {
        execution_id: ExecutionId,
        snapshot: StatusSnapshot,
    },

    /// One more batch item settled.
    BatchProgress {
        completed: usize,
        total: usize,
        /// Rounded completion percentage.
        percent: u8,
    },

    /// Every batch item has settled.
    BatchCompleted {
        total: usize,
        succeeded: usize,
        failed: usize,
    },
}
