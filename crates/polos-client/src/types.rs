//! Request/response shapes for the orchestrator HTTP surface (§4.1, §6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use polos_contracts::{EventType, StepRecord, WaitRecord};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegisterWorkerRequest {
    pub deployment_id: String,
    pub project_id: String,
    pub capabilities: Vec<String>,
    pub max_concurrent: u32,
    pub push_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterWorkerResponse {
    pub worker_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub re_register: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QueueSpec {
    pub name: String,
    pub concurrency_limit: Option<u32>,
}

/// A request to submit one execution, per §4.1's `submit_workflow`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitWorkflowRequest {
    pub workflow_id: String,
    pub payload: serde_json::Value,
    pub deployment_id: String,
    pub parent_execution_id: Option<String>,
    pub root_execution_id: Option<String>,
    pub root_workflow_id: Option<String>,
    pub step_key: Option<String>,
    pub queue_name: Option<String>,
    pub queue_concurrency_limit: Option<u32>,
    pub concurrency_key: Option<String>,
    pub wait_for_subworkflow: bool,
    pub batch_id: Option<String>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub traceparent: Option<String>,
    pub initial_state: Option<serde_json::Value>,
    pub run_timeout_seconds: Option<u64>,
}

impl SubmitWorkflowRequest {
    pub fn new(workflow_id: impl Into<String>, payload: serde_json::Value, deployment_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            payload,
            deployment_id: deployment_id.into(),
            parent_execution_id: None,
            root_execution_id: None,
            root_workflow_id: None,
            step_key: None,
            queue_name: None,
            queue_concurrency_limit: None,
            concurrency_key: None,
            wait_for_subworkflow: false,
            batch_id: None,
            session_id: None,
            user_id: None,
            traceparent: None,
            initial_state: None,
            run_timeout_seconds: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitWorkflowResponse {
    pub execution_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutStepOutputRequest {
    pub outputs: Option<serde_json::Value>,
    pub output_schema_name: Option<String>,
    pub error: Option<polos_contracts::step::RecordedError>,
    pub success: bool,
    pub source_execution_id: Option<String>,
}

impl From<&StepRecord> for PutStepOutputRequest {
    fn from(r: &StepRecord) -> Self {
        Self {
            outputs: r.outputs.clone(),
            output_schema_name: r.output_schema_name.clone(),
            error: r.error.clone(),
            success: r.is_success(),
            source_execution_id: r.source_execution_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetWaitingRequest {
    pub wait_record: WaitRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishEventRequest {
    pub event_type: Option<EventType>,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSuccessRequest {
    pub result: serde_json::Value,
    pub output_schema_name: Option<String>,
    pub final_state: Option<serde_json::Value>,
    pub worker_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportFailureRequest {
    pub error: polos_contracts::step::RecordedError,
    pub stack: Option<String>,
    pub retryable: bool,
    pub final_state: Option<serde_json::Value>,
    pub worker_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub execution_id: String,
    pub status: String,
    pub result: Option<serde_json::Value>,
    pub error: Option<polos_contracts::step::RecordedError>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionMemory {
    pub summary: Option<String>,
    pub messages: Vec<serde_json::Value>,
}

/// Cursor for resuming an SSE stream, per §4.1's `stream_events`.
#[derive(Debug, Clone)]
pub enum StreamCursor {
    Sequence(u64),
    Timestamp(DateTime<Utc>),
}

#[derive(Debug, Clone)]
pub enum StreamTarget {
    Topic(String),
    WorkflowRun { workflow_id: String, workflow_run_id: String },
}
