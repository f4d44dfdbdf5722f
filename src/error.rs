//! Execution error taxonomy
//!
//! Errors surfaced by the command builder, result parser, run registry and
//! execution engine.

use thiserror::Error;

use crate::models::{RunStatus, TestId};

/// Errors raised while orchestrating performance test executions
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Performance test {0} not found")]
    TestNotFound(TestId),

    #[error(
        "Invalid transition for test {test_id} in run '{run_id}': {} -> {to}",
        status_label(.from)
    )]
    InvalidTransition {
        run_id: String,
        test_id: TestId,
        from: Option<RunStatus>,
        to: RunStatus,
    },

    #[error("Process handle unavailable for test {test_id} in run '{run_id}': {reason}")]
    ProcessHandleUnavailable {
        run_id: String,
        test_id: TestId,
        reason: String,
    },

    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Result artifact {path} unavailable: {reason}")]
    ResultUnavailable { path: String, reason: String },

    #[error("Cannot attach result to test {test_id} in run '{run_id}' while {status}")]
    ResultRejected {
        run_id: String,
        test_id: TestId,
        status: String,
    },

    #[error("Failed to launch load generator: {0}")]
    Launch(String),

    #[error("Execution queue is full ({0} pending)")]
    QueueFull(usize),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl ExecutionError {
    /// Whether the caller can fix this by changing the test definition
    pub fn is_user_fixable(&self) -> bool {
        matches!(
            self,
            ExecutionError::Configuration(_) | ExecutionError::TestNotFound(_)
        )
    }
}

fn status_label(status: &Option<RunStatus>) -> String {
    status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "not started".to_string())
}
