//! Run lifecycle models
//!
//! Values produced by one adapter run and the state an adapter moves through
//! while a run executes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of a single successful sync call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    /// Number of records fetched or updated
    pub records_updated: u64,

    /// Whether the provider had nothing new
    pub skipped: bool,

    /// Optional message from the adapter
    pub message: Option<String>,
}

impl SyncResult {
    /// Create a skipped sync result
    pub fn skipped() -> Self {
        Self {
            records_updated: 0,
            skipped: true,
            message: None,
        }
    }

    /// Create a successful sync result
    pub fn success(records_updated: u64) -> Self {
        Self {
            records_updated,
            skipped: false,
            message: None,
        }
    }

    /// Attach a message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Per-adapter run state
///
/// `Running` is the exclusive gate: while set, no other run may start for
/// the same adapter. `Backoff` is only ever seen between attempts of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// No run in progress
    #[default]
    Idle,
    /// An attempt is executing
    Running,
    /// Waiting between attempts of the current run
    Backoff,
}

impl RunState {
    /// Whether a run currently owns the adapter
    pub fn is_busy(&self) -> bool {
        !matches!(self, RunState::Idle)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Running => write!(f, "running"),
            RunState::Backoff => write!(f, "backoff"),
        }
    }
}

/// Settled result of the most recent run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LastResult {
    /// Run succeeded within its attempt budget
    Success,
    /// Run failed after exhausting its attempts (or was abandoned)
    Failure {
        /// Why the run failed
        reason: String,
    },
}

impl LastResult {
    /// Build a failure result
    pub fn failure(reason: impl Into<String>) -> Self {
        LastResult::Failure {
            reason: reason.into(),
        }
    }

    /// Whether this is a success
    pub fn is_success(&self) -> bool {
        matches!(self, LastResult::Success)
    }
}

/// Description of one completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Adapter the run belonged to
    pub adapter: String,

    /// Whether the run settled to success
    pub succeeded: bool,

    /// Number of sync attempts made
    pub attempts: u32,

    /// Error of the last failed attempt
    pub error: Option<String>,

    /// Wall-clock duration of the whole run in milliseconds
    pub duration_ms: u64,

    /// Payload of the successful attempt
    pub result: Option<SyncResult>,
}

impl RunOutcome {
    /// Settled result for the adapter's bookkeeping
    pub fn last_result(&self) -> LastResult {
        if self.succeeded {
            LastResult::Success
        } else {
            LastResult::failure(self.error.clone().unwrap_or_else(|| "unknown".to_string()))
        }
    }
}
