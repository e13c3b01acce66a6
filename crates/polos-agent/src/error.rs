//! `AgentError` — the agent loop's own error cases layered over
//! `polos_runtime::WorkflowError`, per §12's "per-crate thiserror enums wrap
//! the layer below with `#[from]` and add their own variants".

use polos_providers::ProviderError;
use polos_runtime::WorkflowError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("guardrail exhausted after {0} retries: {1}")]
    GuardrailExhausted(u32, String),

    #[error("hook failed: {0}")]
    HookFailed(String),

    #[error("structured output did not validate: {0}")]
    StructuredOutputInvalid(String),
}

/// Every non-`Workflow` variant folds into `WorkflowError::Validation` so the
/// agent loop's handler closure can return the single error type
/// `polos_runtime::workflow::HandlerFn` expects.
impl From<AgentError> for WorkflowError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Workflow(e) => e,
            other => WorkflowError::Validation(other.to_string()),
        }
    }
}
