//! `WorkflowError` and `StepError` — the two error enums the engine surfaces,
//! per §12 ("per-crate thiserror enums... wrap `ClientError` with `#[from]`
//! and add their own durable-specific variants").

use polos_contracts::{ClientError, StepExecutionError};
use thiserror::Error;

use crate::wait::WaitSignal;

/// Errors from a single step primitive call, before the result is threaded
/// into a `WorkflowError` by the caller.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    StepExecution(#[from] StepExecutionError),

    #[error("oversized state: {0}")]
    SizeLimit(#[from] polos_contracts::SizeLimitError),

    #[error("invalid step argument: {0}")]
    InvalidArgument(String),
}

/// The error type threaded through a workflow/agent handler body via `?`.
///
/// `WorkflowError::Wait` is the one variant user code must never match on or
/// recover from — per §9's design note, it is a non-error unwinding signal,
/// not a failure. It exists as a variant here (rather than a parallel return
/// channel) because Rust's `?` operator is the natural "small combinator" the
/// design note calls for; `polos_runtime::workflow` is the only place that is
/// allowed to inspect it.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("step execution failed: {0}")]
    Step(#[from] StepExecutionError),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("execution cancelled")]
    Cancelled,

    #[error("workflow result is not serializable: {0}")]
    Unserializable(String),

    #[error("execution is waiting")]
    Wait(#[from] WaitSignal),
}

impl From<StepError> for WorkflowError {
    fn from(err: StepError) -> Self {
        match err {
            StepError::Client(e) => WorkflowError::Client(e),
            StepError::StepExecution(e) => WorkflowError::Step(e),
            StepError::SizeLimit(e) => WorkflowError::Validation(e.to_string()),
            StepError::InvalidArgument(msg) => WorkflowError::Validation(msg),
        }
    }
}

impl WorkflowError {
    /// Whether reporting this failure to the orchestrator should mark it
    /// retryable (§7: step-execution and tool failures are not retryable;
    /// everything else defaults to retryable).
    pub fn retryable(&self) -> bool {
        !matches!(self, WorkflowError::Step(_))
    }
}
