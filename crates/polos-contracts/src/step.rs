//! Step and wait records — the orchestrator-owned memoization ledger that the
//! step engine (`polos_runtime::step`) reads and writes.
//!
//! Grounded in `durable::workflow::event::WorkflowEvent` and
//! `durable::persistence::store::{TaskDefinition, ClaimedTask}`, which play the
//! same "named durable unit of work" role there; renamed and reshaped to match
//! §3's step-key-addressed record instead of an event-sourced log.

use serde::{Deserialize, Serialize};

use crate::error::StepExecutionError;

/// Outcome of a completed step, as persisted by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
}

/// A durable step record, keyed by `(execution_id, step_key)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_key: String,
    pub status: StepStatus,
    pub outputs: Option<serde_json::Value>,
    pub output_schema_name: Option<String>,
    pub error: Option<RecordedError>,
    pub source_execution_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedError {
    pub message: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl StepRecord {
    pub fn success(step_key: impl Into<String>, outputs: Option<serde_json::Value>) -> Self {
        Self {
            step_key: step_key.into(),
            status: StepStatus::Success,
            outputs,
            output_schema_name: None,
            error: None,
            source_execution_id: None,
        }
    }

    pub fn failure(step_key: impl Into<String>, error: StepExecutionError) -> Self {
        Self {
            step_key: step_key.into(),
            status: StepStatus::Failed,
            outputs: None,
            output_schema_name: None,
            error: Some(RecordedError {
                message: error.message,
                error_type: error.error_type,
            }),
            source_execution_id: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }

    /// Converts a failed record into the `StepExecutionError` that replay must
    /// deterministically re-raise (property 2, "failure stickiness").
    pub fn to_step_error(&self) -> Option<StepExecutionError> {
        self.error.as_ref().map(|e| StepExecutionError {
            message: e.message.clone(),
            error_type: e.error_type.clone(),
        })
    }
}

/// What an execution is waiting for, per §3's "Wait record".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitType {
    Time,
    Event,
    Suspend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitRecord {
    pub wait_type: WaitType,
    pub wait_until: Option<chrono::DateTime<chrono::Utc>>,
    pub wait_topic: Option<String>,
    pub step_key: String,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_record_round_trips_the_step_error() {
        let err = StepExecutionError::with_type("boom", "ValueError");
        let record = StepRecord::failure("k1", err.clone());
        assert!(!record.is_success());
        assert_eq!(record.to_step_error(), Some(err));
    }

    #[test]
    fn success_record_has_no_error() {
        let record = StepRecord::success("k1", Some(serde_json::json!(7)));
        assert!(record.is_success());
        assert!(record.to_step_error().is_none());
    }
}
