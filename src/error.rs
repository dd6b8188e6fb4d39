//! Harness error taxonomy
//!
//! Setup failures abort the suite, timeouts and assertion failures abort the
//! current test case. Transient unreadiness never surfaces here: the poll
//! engine swallows it until its deadline.

use std::time::Duration;

/// Result alias used across the harness library
pub type Result<T, E = HarnessError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Environment start, address resolution or hosts-file patching failed
    #[error("Suite setup failed: {0}")]
    Setup(String),

    /// A bounded wait elapsed before its condition held
    #[error("{operation} timed out after {elapsed:?} ({attempts} attempts), last observation: {last}")]
    Timeout {
        operation: String,
        elapsed: Duration,
        attempts: u32,
        last: String,
    },

    /// The cgroup descriptor exists but cannot be interpreted
    #[error("Malformed environment: {0}")]
    MalformedEnvironment(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    #[error("Deployment error: {0}")]
    Deployment(String),

    #[error("Subject process error: {0}")]
    Process(String),

    #[error("Template error: {0}")]
    Template(String),

    /// The suite was driven through a transition its state machine forbids
    #[error("Illegal lifecycle transition: {0}")]
    Lifecycle(String),

    #[error("Assertion failed: {0}")]
    Assertion(String),

    /// A configuration value or command-line argument was rejected
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl HarnessError {
    pub fn setup(msg: impl Into<String>) -> Self {
        Self::Setup(msg.into())
    }

    /// Whether this error must abort the whole suite rather than one case
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            Self::Setup(_) | Self::MalformedEnvironment(_) | Self::Orchestrator(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
