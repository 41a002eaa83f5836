//! Server status classification for the polling transport.
//!
//! Different backend domains report different status vocabularies
//! (API runs use `completed`/`failed`/`stopped`, web runs use
//! `success`/`failed`). [`StatusSets`] captures the terminal and
//! in-progress vocabularies for one domain so the poll watcher can stay
//! domain-agnostic.

use std::collections::HashSet;

/// How a polled status value should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// No further progress expected; the watch resolves.
    Terminal,
    /// The run is still going; poll again.
    InProgress,
    /// Outside both vocabularies; the watch fails fast rather than
    /// retrying on an unmapped terminal-adjacent value.
    Unrecognized,
}

/// Terminal and in-progress status vocabularies for one domain.
#[derive(Debug, Clone)]
pub struct StatusSets {
    terminal: HashSet<String>,
    in_progress: HashSet<String>,
}

impl StatusSets {
    /// Build a custom vocabulary pair.
    pub fn new<I, J, S>(terminal: I, in_progress: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            terminal: terminal.into_iter().map(Into::into).collect(),
            in_progress: in_progress.into_iter().map(Into::into).collect(),
        }
    }

    /// Vocabulary used by the web-test domain (`success`/`failed`).
    pub fn web_defaults() -> Self {
        Self::new(["success", "failed"], ["running", "pending"])
    }

    /// Classify one reported status value.
    pub fn classify(&self, status: &str) -> StatusClass {
        if self.terminal.contains(status) {
            StatusClass::Terminal
        } else if self.in_progress.contains(status) {
            StatusClass::InProgress
        } else {
            StatusClass::Unrecognized
        }
    }
}

impl Default for StatusSets {
    /// Vocabulary used by the API-test domain.
    fn default() -> Self {
        Self::new(["completed", "failed", "stopped"], ["running", "pending"])
    }
}
