//! Error taxonomy for the monitoring transports.

/// Errors surfaced by the watch and batch APIs.
///
/// `Transport` and `Network` faults are absorbed and retried by their
/// owning component; the remaining variants settle a watch.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WatchError {
    /// Socket-level fault on the WebSocket transport. Non-fatal: the
    /// close handler drives the reconnect decision.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The poll attempt budget was exhausted without a terminal status.
    #[error("Polling timed out after {attempts} attempts")]
    Timeout { attempts: u32 },

    /// The backend reported a status outside the known terminal and
    /// in-progress vocabularies.
    #[error("Unrecognized execution status: {status:?}")]
    UnknownStatus { status: String },

    /// Fetch-level failure while polling. Retried without consuming
    /// the attempt budget.
    #[error("Network error: {0}")]
    Network(String),

    /// The backend answered with a non-success envelope code or an
    /// unusable body.
    #[error("Backend error ({code}): {message}")]
    Application { code: i64, message: String },

    /// The watch was cancelled before reaching a terminal status.
    #[error("Watch cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for WatchError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}
