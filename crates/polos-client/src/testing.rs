//! An in-process `OrchestratorClient` fake, per §13: "exercises replay
//! idempotence, failure stickiness, wait/suspend symmetry, and cancellation
//! atomicity without a network dependency."
//!
//! Grounded in the teacher's worker-pool test harness
//! (`durable::worker::pool`'s test module builds an in-memory `WorkflowEventStore`
//! stand-in rather than hitting Postgres) applied here to the orchestrator
//! client boundary instead of the storage boundary.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use polos_contracts::{ClientError, Event, StepRecord, WaitRecord};
use uuid::Uuid;

use crate::client_trait::OrchestratorClient;
use crate::stream::EventStream;
use crate::types::*;

#[derive(Default)]
struct State {
    steps: HashMap<(String, String), StepRecord>,
    waits: HashMap<String, WaitRecord>,
    executions: HashMap<String, ExecutionSnapshot>,
    session_memory: HashMap<String, SessionMemory>,
    conversations: HashMap<String, Vec<serde_json::Value>>,
    active_workers: HashSet<String>,
    events: Vec<Event>,
    cancelled: HashSet<String>,
    confirmed_cancellations: HashSet<String>,
    next_sequence: u64,
    submitted: Vec<(String, SubmitWorkflowRequest)>,
}

/// An in-memory stand-in for the orchestrator, suitable for unit and
/// integration tests across the workspace. Not a fixture for load testing —
/// it holds everything in a single `Mutex`, mirroring the teacher's test
/// doubles rather than its production store.
pub struct InMemoryOrchestrator {
    state: Mutex<State>,
}

impl Default for InMemoryOrchestrator {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }
}

impl InMemoryOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: seeds a step record directly, bypassing `put_step_output`.
    pub fn seed_step(&self, execution_id: &str, record: StepRecord) {
        let mut state = self.state.lock().unwrap();
        state
            .steps
            .insert((execution_id.to_string(), record.step_key.clone()), record);
    }

    /// Test helper: pushes an event onto a topic, visible to any future
    /// `stream_events` call's prefilled buffer (this fake does not support
    /// live subscription; streams are snapshotted at call time).
    pub fn push_event(&self, topic: &str, event_type: Option<&str>, data: serde_json::Value) {
        let mut state = self.state.lock().unwrap();
        let sequence_id = state.next_sequence;
        state.next_sequence += 1;
        state.events.push(Event {
            id: Uuid::new_v4().to_string(),
            sequence_id,
            topic: topic.to_string(),
            event_type: event_type.map(Into::into),
            data,
            created_at: Utc::now(),
        });
    }

    pub fn is_cancelled(&self, execution_id: &str) -> bool {
        self.state.lock().unwrap().cancelled.contains(execution_id)
    }

    pub fn cancellation_confirmed(&self, execution_id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .confirmed_cancellations
            .contains(execution_id)
    }

    /// Test helper: every `(workflow_id, request)` pair passed to
    /// `submit_workflow`/`submit_workflows`, in call order.
    pub fn submitted_workflows(&self) -> Vec<(String, SubmitWorkflowRequest)> {
        self.state.lock().unwrap().submitted.clone()
    }
}

#[async_trait]
impl OrchestratorClient for InMemoryOrchestrator {
    async fn register_worker(&self, _req: RegisterWorkerRequest) -> Result<String, ClientError> {
        let worker_id = format!("worker-{}", Uuid::new_v4());
        self.state.lock().unwrap().active_workers.insert(worker_id.clone());
        Ok(worker_id)
    }

    async fn mark_online(&self, _worker_id: &str) -> Result<(), ClientError> {
        Ok(())
    }

    async fn heartbeat(&self, worker_id: &str) -> Result<HeartbeatResponse, ClientError> {
        let known = self.state.lock().unwrap().active_workers.contains(worker_id);
        Ok(HeartbeatResponse {
            re_register: !known,
        })
    }

    async fn register_deployment(&self, _deployment_id: &str) -> Result<(), ClientError> {
        Ok(())
    }

    async fn register_agent(&self, _deployment_id: &str, _descriptor: serde_json::Value) -> Result<(), ClientError> {
        Ok(())
    }

    async fn register_tool(&self, _deployment_id: &str, _descriptor: serde_json::Value) -> Result<(), ClientError> {
        Ok(())
    }

    async fn register_deployment_workflow(
        &self,
        _deployment_id: &str,
        _workflow_id: &str,
        _kind: &str,
        _event_triggered: bool,
        _scheduled: bool,
    ) -> Result<(), ClientError> {
        Ok(())
    }

    async fn register_queues(&self, _deployment_id: &str, _queues: Vec<QueueSpec>) -> Result<(), ClientError> {
        Ok(())
    }

    async fn register_event_trigger(&self, _workflow_id: &str, _trigger: serde_json::Value) -> Result<(), ClientError> {
        Ok(())
    }

    async fn register_schedule(&self, _workflow_id: &str, _schedule: serde_json::Value) -> Result<(), ClientError> {
        Ok(())
    }

    async fn submit_workflow(
        &self,
        workflow_id: &str,
        req: SubmitWorkflowRequest,
    ) -> Result<SubmitWorkflowResponse, ClientError> {
        let execution_id = req
            .step_key
            .clone()
            .unwrap_or_else(|| format!("exec-{}", Uuid::new_v4()));
        let created_at = Utc::now();
        let mut state = self.state.lock().unwrap();
        state.executions.insert(
            execution_id.clone(),
            ExecutionSnapshot {
                execution_id: execution_id.clone(),
                status: "running".to_string(),
                result: None,
                error: None,
            },
        );
        state.submitted.push((workflow_id.to_string(), req));
        Ok(SubmitWorkflowResponse {
            execution_id,
            created_at,
        })
    }

    async fn submit_workflows(
        &self,
        reqs: Vec<(String, SubmitWorkflowRequest)>,
    ) -> Result<Vec<SubmitWorkflowResponse>, ClientError> {
        let mut out = Vec::with_capacity(reqs.len());
        for (workflow_id, req) in reqs {
            out.push(self.submit_workflow(&workflow_id, req).await?);
        }
        Ok(out)
    }

    async fn get_step_output(&self, execution_id: &str, step_key: &str) -> Result<Option<StepRecord>, ClientError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .steps
            .get(&(execution_id.to_string(), step_key.to_string()))
            .cloned())
    }

    async fn put_step_output(
        &self,
        execution_id: &str,
        step_key: &str,
        req: PutStepOutputRequest,
    ) -> Result<(), ClientError> {
        let status = if req.success {
            polos_contracts::StepStatus::Success
        } else {
            polos_contracts::StepStatus::Failed
        };
        let record = StepRecord {
            step_key: step_key.to_string(),
            status,
            outputs: req.outputs,
            output_schema_name: req.output_schema_name,
            error: req.error,
            source_execution_id: req.source_execution_id,
        };
        self.state
            .lock()
            .unwrap()
            .steps
            .insert((execution_id.to_string(), step_key.to_string()), record);
        Ok(())
    }

    async fn set_waiting(&self, execution_id: &str, wait: WaitRecord) -> Result<(), ClientError> {
        self.state
            .lock()
            .unwrap()
            .waits
            .insert(execution_id.to_string(), wait);
        Ok(())
    }

    async fn update_otel_span_id(&self, _execution_id: &str, _span_id: &str) -> Result<(), ClientError> {
        Ok(())
    }

    async fn publish_events(
        &self,
        topic: &str,
        events: Vec<PublishEventRequest>,
        execution_id: Option<&str>,
        root_execution_id: Option<&str>,
    ) -> Result<Vec<u64>, ClientError> {
        let mut state = self.state.lock().unwrap();
        let mut sequence_ids = Vec::with_capacity(events.len());
        for req in events {
            let sequence_id = state.next_sequence;
            state.next_sequence += 1;
            let mut data = req.data;
            if let Some(obj) = data.as_object_mut() {
                obj.insert(
                    "_metadata".to_string(),
                    serde_json::json!({
                        "execution_id": execution_id,
                        "root_execution_id": root_execution_id,
                    }),
                );
            }
            state.events.push(Event {
                id: Uuid::new_v4().to_string(),
                sequence_id,
                topic: topic.to_string(),
                event_type: req.event_type,
                data,
                created_at: Utc::now(),
            });
            sequence_ids.push(sequence_id);
        }
        Ok(sequence_ids)
    }

    async fn stream_events(
        &self,
        target: StreamTarget,
        cursor: Option<StreamCursor>,
    ) -> Result<EventStream, ClientError> {
        let state = self.state.lock().unwrap();
        let topic_filter = match &target {
            StreamTarget::Topic(topic) => topic.clone(),
            StreamTarget::WorkflowRun {
                workflow_id,
                workflow_run_id,
            } => polos_contracts::workflow_topic(workflow_id, workflow_run_id),
        };
        let after_sequence = match cursor {
            Some(StreamCursor::Sequence(seq)) => seq,
            _ => 0,
        };
        let matching: Vec<Result<Event, ClientError>> = state
            .events
            .iter()
            .filter(|e| e.topic == topic_filter && e.sequence_id >= after_sequence)
            .cloned()
            .map(Ok)
            .collect();
        Ok(EventStream::from_events(futures::stream::iter(matching)))
    }

    async fn get_execution(&self, execution_id: &str) -> Result<ExecutionSnapshot, ClientError> {
        self.state
            .lock()
            .unwrap()
            .executions
            .get(execution_id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(execution_id.to_string()))
    }

    async fn cancel_execution(&self, execution_id: &str) -> Result<(), ClientError> {
        self.state
            .lock()
            .unwrap()
            .cancelled
            .insert(execution_id.to_string());
        Ok(())
    }

    async fn confirm_cancellation(&self, execution_id: &str, _worker_id: &str) -> Result<(), ClientError> {
        self.state
            .lock()
            .unwrap()
            .confirmed_cancellations
            .insert(execution_id.to_string());
        Ok(())
    }

    async fn report_success(&self, execution_id: &str, req: ReportSuccessRequest) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        if state.cancelled.contains(execution_id) && !state.confirmed_cancellations.contains(execution_id) {
            return Err(ClientError::Conflict);
        }
        state.executions.insert(
            execution_id.to_string(),
            ExecutionSnapshot {
                execution_id: execution_id.to_string(),
                status: "succeeded".to_string(),
                result: Some(req.result),
                error: None,
            },
        );
        Ok(())
    }

    async fn report_failure(&self, execution_id: &str, req: ReportFailureRequest) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        state.executions.insert(
            execution_id.to_string(),
            ExecutionSnapshot {
                execution_id: execution_id.to_string(),
                status: "failed".to_string(),
                result: None,
                error: Some(req.error),
            },
        );
        Ok(())
    }

    async fn get_session_memory(&self, session_id: &str) -> Result<SessionMemory, ClientError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .session_memory
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn put_session_memory(&self, session_id: &str, memory: SessionMemory) -> Result<(), ClientError> {
        self.state
            .lock()
            .unwrap()
            .session_memory
            .insert(session_id.to_string(), memory);
        Ok(())
    }

    async fn add_conversation_history(
        &self,
        conversation_id: &str,
        messages: Vec<serde_json::Value>,
    ) -> Result<(), ClientError> {
        self.state
            .lock()
            .unwrap()
            .conversations
            .entry(conversation_id.to_string())
            .or_default()
            .extend(messages);
        Ok(())
    }

    async fn get_conversation_history(
        &self,
        conversation_id: &str,
        window: Option<u32>,
    ) -> Result<Vec<serde_json::Value>, ClientError> {
        let state = self.state.lock().unwrap();
        let all = state
            .conversations
            .get(conversation_id)
            .cloned()
            .unwrap_or_default();
        Ok(match window {
            Some(w) => all.into_iter().rev().take(w as usize).rev().collect(),
            None => all,
        })
    }

    async fn get_active_worker_ids(&self) -> Result<HashSet<String>, ClientError> {
        Ok(self.state.lock().unwrap().active_workers.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn step_output_round_trips() {
        let orchestrator = InMemoryOrchestrator::new();
        orchestrator
            .put_step_output(
                "exec-1",
                "step-1",
                PutStepOutputRequest {
                    outputs: Some(serde_json::json!(42)),
                    output_schema_name: None,
                    error: None,
                    success: true,
                    source_execution_id: None,
                },
            )
            .await
            .unwrap();
        let record = orchestrator
            .get_step_output("exec-1", "step-1")
            .await
            .unwrap()
            .unwrap();
        assert!(record.is_success());
        assert_eq!(record.outputs, Some(serde_json::json!(42)));
    }

    #[tokio::test]
    async fn report_success_after_cancellation_without_confirmation_conflicts() {
        let orchestrator = InMemoryOrchestrator::new();
        orchestrator.cancel_execution("exec-1").await.unwrap();
        let result = orchestrator
            .report_success(
                "exec-1",
                ReportSuccessRequest {
                    result: serde_json::json!(null),
                    output_schema_name: None,
                    final_state: None,
                    worker_id: "w1".into(),
                },
            )
            .await;
        assert!(matches!(result, Err(ClientError::Conflict)));
    }

    #[tokio::test]
    async fn conversation_history_window_keeps_most_recent() {
        let orchestrator = InMemoryOrchestrator::new();
        for i in 0..5 {
            orchestrator
                .add_conversation_history("conv-1", vec![serde_json::json!(i)])
                .await
                .unwrap();
        }
        let history = orchestrator
            .get_conversation_history("conv-1", Some(2))
            .await
            .unwrap();
        assert_eq!(history, vec![serde_json::json!(3), serde_json::json!(4)]);
    }
}
