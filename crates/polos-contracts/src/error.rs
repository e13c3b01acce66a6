//! Error taxonomy shared by the orchestrator client and everything built on it.
//!
//! Grounded in `durable::persistence::StoreError` and `durable::worker::WorkerPoolError`
//! (one `thiserror` enum per concern) but adapted to the transient/conflict/permanent
//! split the spec's orchestrator boundary requires.

use thiserror::Error;

/// Errors raised by any call into the orchestrator.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network failure or 5xx response. Safe to retry for idempotent operations.
    #[error("transient orchestrator error: {0}")]
    Transient(String),

    /// 409 Conflict — the execution has been reassigned to another worker.
    /// Terminal for completion-reporting paths; callers must drop the write.
    #[error("conflict: execution reassigned")]
    Conflict,

    /// 4xx (non-409) response — configuration or identifier problem.
    #[error("permanent orchestrator error: {0}")]
    Permanent(String),

    /// The orchestrator returned a body that didn't match the expected shape.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The requested step/execution/record does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl ClientError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Transient(_))
    }
}

/// Raised when a step primitive is replayed against a step key that already
/// recorded a failure. The message is exactly the one persisted by the
/// original failing attempt, so replay is deterministic.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct StepExecutionError {
    pub message: String,
    pub error_type: Option<String>,
}

impl StepExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
        }
    }

    pub fn with_type(message: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: Some(error_type.into()),
        }
    }
}
