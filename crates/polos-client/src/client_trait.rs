//! The `OrchestratorClient` trait — every operation enumerated in §4.1.
//!
//! Grounded directly in `durable::persistence::store::WorkflowEventStore`'s
//! shape: an `async_trait` with `Send + Sync + 'static` bound, a handful of
//! default no-op methods for operations not every backend needs, and one
//! error type threaded through every call.

use async_trait::async_trait;
use polos_contracts::{ClientError, Event, StepRecord, WaitRecord};

use crate::stream::EventStream;
use crate::types::*;

#[async_trait]
pub trait OrchestratorClient: Send + Sync + 'static {
    // -- Worker lifecycle -------------------------------------------------
    async fn register_worker(&self, req: RegisterWorkerRequest) -> Result<String, ClientError>;
    async fn mark_online(&self, worker_id: &str) -> Result<(), ClientError>;
    async fn heartbeat(&self, worker_id: &str) -> Result<HeartbeatResponse, ClientError>;

    // -- Registration -------------------------------------------------------
    async fn register_deployment(&self, deployment_id: &str) -> Result<(), ClientError>;
    async fn register_agent(&self, deployment_id: &str, descriptor: serde_json::Value) -> Result<(), ClientError>;
    async fn register_tool(&self, deployment_id: &str, descriptor: serde_json::Value) -> Result<(), ClientError>;
    async fn register_deployment_workflow(
        &self,
        deployment_id: &str,
        workflow_id: &str,
        kind: &str,
        event_triggered: bool,
        scheduled: bool,
    ) -> Result<(), ClientError>;
    async fn register_queues(&self, deployment_id: &str, queues: Vec<QueueSpec>) -> Result<(), ClientError>;
    async fn register_event_trigger(&self, workflow_id: &str, trigger: serde_json::Value) -> Result<(), ClientError>;
    async fn register_schedule(&self, workflow_id: &str, schedule: serde_json::Value) -> Result<(), ClientError>;

    // -- Execution submission -----------------------------------------------
    async fn submit_workflow(&self, workflow_id: &str, req: SubmitWorkflowRequest) -> Result<SubmitWorkflowResponse, ClientError>;
    async fn submit_workflows(&self, reqs: Vec<(String, SubmitWorkflowRequest)>) -> Result<Vec<SubmitWorkflowResponse>, ClientError>;

    // -- Step records ---------------------------------------------------
    async fn get_step_output(&self, execution_id: &str, step_key: &str) -> Result<Option<StepRecord>, ClientError>;
    async fn put_step_output(&self, execution_id: &str, step_key: &str, req: PutStepOutputRequest) -> Result<(), ClientError>;

    // -- Wait state ---------------------------------------------------------
    async fn set_waiting(&self, execution_id: &str, wait: WaitRecord) -> Result<(), ClientError>;
    async fn update_otel_span_id(&self, execution_id: &str, span_id: &str) -> Result<(), ClientError>;

    // -- Events ---------------------------------------------------------
    async fn publish_events(
        &self,
        topic: &str,
        events: Vec<PublishEventRequest>,
        execution_id: Option<&str>,
        root_execution_id: Option<&str>,
    ) -> Result<Vec<u64>, ClientError>;
    async fn stream_events(
        &self,
        target: StreamTarget,
        cursor: Option<StreamCursor>,
    ) -> Result<EventStream, ClientError>;

    // -- Execution lifecycle --------------------------------------------
    async fn get_execution(&self, execution_id: &str) -> Result<ExecutionSnapshot, ClientError>;
    async fn cancel_execution(&self, execution_id: &str) -> Result<(), ClientError>;
    async fn confirm_cancellation(&self, execution_id: &str, worker_id: &str) -> Result<(), ClientError>;
    async fn report_success(&self, execution_id: &str, req: ReportSuccessRequest) -> Result<(), ClientError>;
    async fn report_failure(&self, execution_id: &str, req: ReportFailureRequest) -> Result<(), ClientError>;

    // -- Session memory ---------------------------------------------------
    async fn get_session_memory(&self, session_id: &str) -> Result<SessionMemory, ClientError>;
    async fn put_session_memory(&self, session_id: &str, memory: SessionMemory) -> Result<(), ClientError>;
    async fn add_conversation_history(&self, conversation_id: &str, messages: Vec<serde_json::Value>) -> Result<(), ClientError>;
    async fn get_conversation_history(&self, conversation_id: &str, window: Option<u32>) -> Result<Vec<serde_json::Value>, ClientError>;

    // -- Orphan sweep support ---------------------------------------------
    async fn get_active_worker_ids(&self) -> Result<std::collections::HashSet<String>, ClientError>;

    /// Pull-mode polling, present for interface completeness (§1: push mode is
    /// the only active mode in this runtime). Default implementation reports
    /// no available work so a push-only backend need not override it.
    async fn poll_work(&self, _worker_id: &str, _max_workflows: u32) -> Result<Vec<Event>, ClientError> {
        Ok(Vec::new())
    }
}
