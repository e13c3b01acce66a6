//! Durable step primitives (C3), implemented as methods on `ExecutionHandle`.
//!
//! Shared contract per §4.2: look up the step record; present+success decodes
//! and returns; present+failed re-raises the recorded `StepExecutionError`
//! deterministically; absent runs the work, persists the outcome, and
//! publishes `step_start`/`step_finish` fire-and-forget.
//!
//! Grounded in `examples/original_source/sdk/python/polos/core/step.py`'s
//! `_check_existing_step`/`_handle_existing_step`/`_save_step_output` sequence,
//! translated into the teacher's `async_trait` + `thiserror` idiom.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use polos_contracts::serialize::{safe_serialize, serialize_with_limit};
use polos_contracts::{
    EventType, StepExecutionError, StepRecord, StepStatus, WaitRecord, WaitType, MAX_STATE_BYTES,
};
use polos_client::types::{PublishEventRequest, PutStepOutputRequest, SubmitWorkflowRequest};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::context::ExecutionHandle;
use crate::error::{StepError, WorkflowError};
use crate::wait::WaitSignal;

const DEFAULT_RETRIES: u32 = 2;
const RETRY_BASE: Duration = Duration::from_secs(1);
const RETRY_CAP: Duration = Duration::from_secs(10);

impl ExecutionHandle {
    async fn existing_step(&self, step_key: &str) -> Result<Option<StepRecord>, StepError> {
        Ok(self.client().get_step_output(&self.context().execution_id, step_key).await?)
    }

    async fn record_output(&self, step_key: &str, record: &StepRecord) -> Result<(), StepError> {
        self.client()
            .put_step_output(&self.context().execution_id, step_key, PutStepOutputRequest::from(record))
            .await?;
        Ok(())
    }

    async fn publish_lifecycle(&self, step_key: &str, suffix: &str, data: Value) {
        let topic = self.workflow_topic();
        let result = self
            .client()
            .publish_events(
                &topic,
                vec![PublishEventRequest {
                    event_type: Some(EventType::from(format!("step_{suffix}").as_str())),
                    data: serde_json::json!({"step_key": step_key, "data": data}),
                }],
                Some(&self.context().execution_id),
                Some(&self.context().lineage.root_execution_id),
            )
            .await;
        if let Err(err) = result {
            warn!(step_key, %err, "dropped step_{} event", suffix);
        }
    }

    /// `step.run(step_key, fn)` — memoized execution of a fallible async
    /// closure, with bounded exponential-backoff retry (defaults: 2 retries,
    /// base 1s, cap 10s).
    pub async fn run<T, F, Fut>(&self, step_key: &str, f: F) -> Result<T, WorkflowError>
    where
        T: Serialize + DeserializeOwned,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StepExecutionError>>,
    {
        self.run_with_retries(step_key, DEFAULT_RETRIES, f).await
    }

    pub async fn run_with_retries<T, F, Fut>(
        &self,
        step_key: &str,
        retries: u32,
        f: F,
    ) -> Result<T, WorkflowError>
    where
        T: Serialize + DeserializeOwned,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StepExecutionError>>,
    {
        if let Some(record) = self.existing_step(step_key).await.map_err(WorkflowError::from)? {
            debug!(step_key, "step memoization hit");
            return replay_output(&record);
        }

        self.publish_lifecycle(step_key, "start", Value::Null).await;

        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => {
                    let outputs = safe_serialize(&value);
                    let record = StepRecord::success(step_key, Some(outputs));
                    self.record_output(step_key, &record).await.map_err(WorkflowError::from)?;
                    self.publish_lifecycle(step_key, "finish", Value::Null).await;
                    return Ok(value);
                }
                Err(err) if attempt < retries => {
                    warn!(step_key, attempt, error = %err, "step failed, retrying");
                    let delay = (RETRY_BASE * 2u32.pow(attempt)).min(RETRY_CAP);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    let record = StepRecord::failure(step_key, err.clone());
                    self.record_output(step_key, &record).await.map_err(WorkflowError::from)?;
                    return Err(WorkflowError::Step(err));
                }
            }
        }
    }

    /// `step.wait_for(step_key, duration)`.
    pub async fn wait_for(&self, step_key: &str, duration: chrono::Duration) -> Result<(), WorkflowError> {
        let target = Utc::now() + duration;
        self.wait_until(step_key, target).await
    }

    /// `step.wait_until(step_key, timestamp)`.
    pub async fn wait_until(&self, step_key: &str, target: DateTime<Utc>) -> Result<(), WorkflowError> {
        if let Some(record) = self.existing_step(step_key).await.map_err(WorkflowError::from)? {
            return match record.status {
                StepStatus::Success => Ok(()),
                StepStatus::Failed => Err(WorkflowError::Step(record.to_step_error().expect("failed record"))),
            };
        }

        let now = Utc::now();
        if target <= now {
            let err = StepExecutionError::new("wait target must be strictly in the future");
            let record = StepRecord::failure(step_key, err.clone());
            self.record_output(step_key, &record).await.map_err(WorkflowError::from)?;
            return Err(WorkflowError::Step(err));
        }

        let delay = (target - now).to_std().unwrap_or_default();
        if delay <= self.wait_threshold() {
            tokio::time::sleep(delay).await;
            let record = StepRecord::success(step_key, Some(serde_json::json!({"wait_until": target})));
            self.record_output(step_key, &record).await.map_err(WorkflowError::from)?;
            return Ok(());
        }

        let wait_record = WaitRecord {
            wait_type: WaitType::Time,
            wait_until: Some(target),
            wait_topic: None,
            step_key: step_key.to_string(),
            expires_at: None,
        };
        self.client()
            .set_waiting(&self.context().execution_id, wait_record.clone())
            .await
            .map_err(StepError::from)
            .map_err(WorkflowError::from)?;
        Err(WorkflowError::Wait(WaitSignal::new(wait_record)))
    }

    /// `step.wait_for_event(step_key, topic, timeout?)`.
    pub async fn wait_for_event<T: DeserializeOwned>(
        &self,
        step_key: &str,
        topic: &str,
        timeout: Option<chrono::Duration>,
    ) -> Result<T, WorkflowError> {
        if let Some(record) = self.existing_step(step_key).await.map_err(WorkflowError::from)? {
            return replay_output(&record);
        }

        let wait_record = WaitRecord {
            wait_type: WaitType::Event,
            wait_until: None,
            wait_topic: Some(topic.to_string()),
            step_key: step_key.to_string(),
            expires_at: timeout.map(|t| Utc::now() + t),
        };
        self.client()
            .set_waiting(&self.context().execution_id, wait_record.clone())
            .await
            .map_err(StepError::from)
            .map_err(WorkflowError::from)?;
        Err(WorkflowError::Wait(WaitSignal::new(wait_record)))
    }

    /// `step.publish_event(step_key, topic, data, event_type?)`.
    pub async fn publish_event(
        &self,
        step_key: &str,
        topic: &str,
        data: Value,
        event_type: Option<&str>,
    ) -> Result<(), WorkflowError> {
        if self.existing_step(step_key).await.map_err(WorkflowError::from)?.is_some() {
            return Ok(());
        }
        self.client()
            .publish_events(
                topic,
                vec![PublishEventRequest {
                    event_type: event_type.map(EventType::from),
                    data,
                }],
                Some(&self.context().execution_id),
                Some(&self.context().lineage.root_execution_id),
            )
            .await
            .map_err(StepError::from)
            .map_err(WorkflowError::from)?;
        let record = StepRecord::success(step_key, None);
        self.record_output(step_key, &record).await.map_err(WorkflowError::from)?;
        Ok(())
    }

    /// `step.publish_workflow_event(step_key, data, event_type?)` — uses the
    /// canonical `workflow/{root_workflow_id}/{root_execution_id}` topic.
    pub async fn publish_workflow_event(
        &self,
        step_key: &str,
        data: Value,
        event_type: Option<&str>,
    ) -> Result<(), WorkflowError> {
        let topic = self.workflow_topic();
        self.publish_event(step_key, &topic, data, event_type).await
    }

    /// `step.suspend(step_key, data, timeout?)`.
    pub async fn suspend<T: DeserializeOwned>(
        &self,
        step_key: &str,
        data: Value,
        timeout: Option<chrono::Duration>,
    ) -> Result<T, WorkflowError> {
        if let Some(record) = self.existing_step(step_key).await.map_err(WorkflowError::from)? {
            return replay_output(&record);
        }

        let topic = self.workflow_topic();
        self.client()
            .publish_events(
                &topic,
                vec![PublishEventRequest {
                    event_type: Some(EventType::suspend(step_key)),
                    data,
                }],
                Some(&self.context().execution_id),
                Some(&self.context().lineage.root_execution_id),
            )
            .await
            .map_err(StepError::from)
            .map_err(WorkflowError::from)?;

        let wait_record = WaitRecord {
            wait_type: WaitType::Suspend,
            wait_until: None,
            wait_topic: Some(topic),
            step_key: step_key.to_string(),
            expires_at: timeout.map(|t| Utc::now() + t),
        };
        self.client()
            .set_waiting(&self.context().execution_id, wait_record.clone())
            .await
            .map_err(StepError::from)
            .map_err(WorkflowError::from)?;
        Err(WorkflowError::Wait(WaitSignal::new(wait_record)))
    }

    /// `step.resume(step_key, suspend_step_key, suspend_execution_id,
    /// suspend_workflow_id, data)` — publishes the resume event on behalf of
    /// another actor; the dual of `suspend`.
    pub async fn resume(
        &self,
        suspend_step_key: &str,
        suspend_execution_id: &str,
        suspend_workflow_id: &str,
        data: Value,
    ) -> Result<(), WorkflowError> {
        let topic = polos_contracts::workflow_topic(suspend_workflow_id, suspend_execution_id);
        self.client()
            .publish_events(
                &topic,
                vec![PublishEventRequest {
                    event_type: Some(EventType::resume(suspend_step_key)),
                    data,
                }],
                None,
                Some(suspend_execution_id),
            )
            .await
            .map_err(StepError::from)
            .map_err(WorkflowError::from)?;
        Ok(())
    }

    /// `step.invoke(step_key, workflow_id, payload, initial_state?)` —
    /// fire-and-forget sub-workflow submission. Per testable property 11, an
    /// oversized `initial_state` is rejected before the replay lookup (itself
    /// an HTTP call), not just before `submit_workflow`.
    pub async fn invoke(
        &self,
        step_key: &str,
        workflow_id: &str,
        payload: Value,
        initial_state: Option<Value>,
    ) -> Result<String, WorkflowError> {
        validate_initial_state(&initial_state)?;
        if let Some(record) = self.existing_step(step_key).await.map_err(WorkflowError::from)? {
            return replay_output(&record);
        }
        let req = self.submission_for(workflow_id, payload, None, initial_state);
        let resp = self
            .client()
            .submit_workflow(workflow_id, req)
            .await
            .map_err(StepError::from)
            .map_err(WorkflowError::from)?;
        let record = StepRecord::success(step_key, Some(serde_json::json!({"execution_id": resp.execution_id})));
        self.record_output(step_key, &record).await.map_err(WorkflowError::from)?;
        Ok(resp.execution_id)
    }

    /// `step.invoke_and_wait(step_key, workflow_id, payload, initial_state?)`
    /// — blocks until the child completes. Per §9's corrected open question,
    /// replay always returns a *fresh* value decoded from the cached record;
    /// nothing here ever mutates that record in place.
    pub async fn invoke_and_wait<T: DeserializeOwned>(
        &self,
        step_key: &str,
        workflow_id: &str,
        payload: Value,
        initial_state: Option<Value>,
    ) -> Result<T, WorkflowError> {
        validate_initial_state(&initial_state)?;
        if let Some(record) = self.existing_step(step_key).await.map_err(WorkflowError::from)? {
            return replay_output(&record);
        }
        let req = self.submission_for(workflow_id, payload, Some(step_key.to_string()), initial_state);
        self.client()
            .submit_workflow(workflow_id, req)
            .await
            .map_err(StepError::from)
            .map_err(WorkflowError::from)?;

        let wait_record = WaitRecord {
            wait_type: WaitType::Event,
            wait_until: None,
            wait_topic: None,
            step_key: step_key.to_string(),
            expires_at: None,
        };
        self.client()
            .set_waiting(&self.context().execution_id, wait_record.clone())
            .await
            .map_err(StepError::from)
            .map_err(WorkflowError::from)?;
        Err(WorkflowError::Wait(WaitSignal::new(wait_record)))
    }

    /// `step.batch_invoke(step_key, [BatchInput])` — one round-trip submitting
    /// every workflow atomically. Each `BatchInput` is `(workflow_id, payload,
    /// initial_state)`; every item's `initial_state` is size-checked before
    /// the replay lookup.
    pub async fn batch_invoke(
        &self,
        step_key: &str,
        requests: Vec<(String, Value, Option<Value>)>,
    ) -> Result<Vec<String>, WorkflowError> {
        for (_, _, initial_state) in &requests {
            validate_initial_state(initial_state)?;
        }
        if let Some(record) = self.existing_step(step_key).await.map_err(WorkflowError::from)? {
            return replay_output(&record);
        }
        let reqs = requests
            .into_iter()
            .map(|(workflow_id, payload, initial_state)| {
                let req = self.submission_for(&workflow_id, payload, None, initial_state);
                (workflow_id, req)
            })
            .collect();
        let responses = self
            .client()
            .submit_workflows(reqs)
            .await
            .map_err(StepError::from)
            .map_err(WorkflowError::from)?;
        let execution_ids: Vec<String> = responses.into_iter().map(|r| r.execution_id).collect();
        let record = StepRecord::success(step_key, Some(serde_json::to_value(&execution_ids).unwrap_or(Value::Null)));
        self.record_output(step_key, &record).await.map_err(WorkflowError::from)?;
        Ok(execution_ids)
    }

    /// `step.batch_invoke_and_wait(step_key, [BatchInput])` — one step that
    /// becomes ready only when every child is done.
    pub async fn batch_invoke_and_wait<T: DeserializeOwned>(
        &self,
        step_key: &str,
        requests: Vec<(String, Value, Option<Value>)>,
    ) -> Result<T, WorkflowError> {
        for (_, _, initial_state) in &requests {
            validate_initial_state(initial_state)?;
        }
        if let Some(record) = self.existing_step(step_key).await.map_err(WorkflowError::from)? {
            return replay_output(&record);
        }
        let reqs = requests
            .into_iter()
            .map(|(workflow_id, payload, initial_state)| {
                let req = self.submission_for(&workflow_id, payload, Some(step_key.to_string()), initial_state);
                (workflow_id, req)
            })
            .collect();
        self.client()
            .submit_workflows(reqs)
            .await
            .map_err(StepError::from)
            .map_err(WorkflowError::from)?;

        let wait_record = WaitRecord {
            wait_type: WaitType::Event,
            wait_until: None,
            wait_topic: None,
            step_key: step_key.to_string(),
            expires_at: None,
        };
        self.client()
            .set_waiting(&self.context().execution_id, wait_record.clone())
            .await
            .map_err(StepError::from)
            .map_err(WorkflowError::from)?;
        Err(WorkflowError::Wait(WaitSignal::new(wait_record)))
    }

    /// `step.agent_invoke(step_key, config)` — thin adapter over `invoke`:
    /// builds the conventional agent payload (`input` plus any session/user/
    /// conversation/stream overrides) and delegates, per spec.md:95.
    pub async fn agent_invoke(&self, step_key: &str, config: AgentRunConfig) -> Result<String, WorkflowError> {
        let initial_state = config.initial_state.clone();
        let agent = config.agent.clone();
        let payload = config.into_payload();
        self.invoke(step_key, &agent, payload, initial_state).await
    }

    /// `step.agent_invoke_and_wait(step_key, config)` — thin adapter over
    /// `invoke_and_wait`, same payload-building as `agent_invoke`.
    pub async fn agent_invoke_and_wait<T: DeserializeOwned>(
        &self,
        step_key: &str,
        config: AgentRunConfig,
    ) -> Result<T, WorkflowError> {
        let initial_state = config.initial_state.clone();
        let agent = config.agent.clone();
        let payload = config.into_payload();
        self.invoke_and_wait(step_key, &agent, payload, initial_state).await
    }

    /// `step.batch_agent_invoke(step_key, [AgentRunConfig])` — thin adapter
    /// over `batch_invoke`.
    pub async fn batch_agent_invoke(&self, step_key: &str, configs: Vec<AgentRunConfig>) -> Result<Vec<String>, WorkflowError> {
        let requests = configs
            .into_iter()
            .map(|config| {
                let initial_state = config.initial_state.clone();
                let agent = config.agent.clone();
                (agent, config.into_payload(), initial_state)
            })
            .collect();
        self.batch_invoke(step_key, requests).await
    }

    /// `step.batch_agent_invoke_and_wait(step_key, [AgentRunConfig])` — thin
    /// adapter over `batch_invoke_and_wait`.
    pub async fn batch_agent_invoke_and_wait<T: DeserializeOwned>(
        &self,
        step_key: &str,
        configs: Vec<AgentRunConfig>,
    ) -> Result<T, WorkflowError> {
        let requests = configs
            .into_iter()
            .map(|config| {
                let initial_state = config.initial_state.clone();
                let agent = config.agent.clone();
                (agent, config.into_payload(), initial_state)
            })
            .collect();
        self.batch_invoke_and_wait(step_key, requests).await
    }

    /// `step.uuid(step_key)` — deterministic under replay.
    pub async fn uuid(&self, step_key: &str) -> Result<String, WorkflowError> {
        if let Some(record) = self.existing_step(step_key).await.map_err(WorkflowError::from)? {
            return replay_output(&record);
        }
        let value = Uuid::new_v4().to_string();
        let record = StepRecord::success(step_key, Some(serde_json::json!(value)));
        self.record_output(step_key, &record).await.map_err(WorkflowError::from)?;
        Ok(value)
    }

    /// `step.now(step_key)` — deterministic under replay.
    pub async fn now(&self, step_key: &str) -> Result<DateTime<Utc>, WorkflowError> {
        if let Some(record) = self.existing_step(step_key).await.map_err(WorkflowError::from)? {
            return replay_output(&record);
        }
        let value = Utc::now();
        let record = StepRecord::success(step_key, Some(serde_json::json!(value)));
        self.record_output(step_key, &record).await.map_err(WorkflowError::from)?;
        Ok(value)
    }

    /// `step.random(step_key)` — deterministic under replay; uniform in `[0, 1)`.
    pub async fn random(&self, step_key: &str) -> Result<f64, WorkflowError> {
        if let Some(record) = self.existing_step(step_key).await.map_err(WorkflowError::from)? {
            return replay_output(&record);
        }
        let value: f64 = rand::random();
        let record = StepRecord::success(step_key, Some(serde_json::json!(value)));
        self.record_output(step_key, &record).await.map_err(WorkflowError::from)?;
        Ok(value)
    }

    /// `step.trace(name, attributes?, block)` — opens a child span, runs
    /// `block`, and records success or the caught error on exit.
    pub async fn trace<T, F, Fut>(&self, name: &str, attributes: Value, block: F) -> Result<T, WorkflowError>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, WorkflowError>>,
    {
        self.spans().start_span(name, "trace", attributes).await;
        match block().await {
            Ok(value) => {
                let output = serde_json::to_value(&value).ok();
                self.spans().end_span(output, None).await;
                Ok(value)
            }
            Err(err) => {
                self.spans()
                    .end_span(None, Some(serde_json::json!({"message": err.to_string()})))
                    .await;
                Err(err)
            }
        }
    }

    fn submission_for(
        &self,
        workflow_id: &str,
        payload: Value,
        step_key: Option<String>,
        initial_state: Option<Value>,
    ) -> SubmitWorkflowRequest {
        let ctx = self.context();
        let mut req = SubmitWorkflowRequest::new(workflow_id, payload, ctx.deployment_id.clone());
        req.parent_execution_id = Some(ctx.execution_id.clone());
        req.root_execution_id = Some(ctx.lineage.root_execution_id.clone());
        req.root_workflow_id = Some(ctx.lineage.root_workflow_id.clone());
        req.step_key = step_key;
        req.session_id = ctx.session_id.clone();
        req.user_id = ctx.user_id.clone();
        req.initial_state = initial_state;
        req
    }
}

/// An *agent run config* (spec.md:95): the agent to invoke, its input, and
/// overrides `agent_invoke`/`agent_invoke_and_wait`/their batch counterparts
/// fold into the conventional agent payload shape before delegating to the
/// matching workflow primitive.
#[derive(Debug, Clone)]
pub struct AgentRunConfig {
    pub agent: String,
    pub input: Value,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub stream: Option<bool>,
    pub timeout: Option<chrono::Duration>,
    pub initial_state: Option<Value>,
}

impl AgentRunConfig {
    pub fn new(agent: impl Into<String>, input: Value) -> Self {
        Self {
            agent: agent.into(),
            input,
            session_id: None,
            user_id: None,
            conversation_id: None,
            stream: None,
            timeout: None,
            initial_state: None,
        }
    }

    /// Builds the payload `agent_unit`'s handler reads via
    /// `AgentInput::from_payload` (an `input` key plus whichever overrides
    /// were set), consuming `self` since the payload owns the input value.
    fn into_payload(self) -> Value {
        let mut payload = serde_json::json!({"input": self.input});
        let obj = payload.as_object_mut().expect("object literal is always a map");
        if let Some(session_id) = self.session_id {
            obj.insert("session_id".to_string(), Value::String(session_id));
        }
        if let Some(user_id) = self.user_id {
            obj.insert("user_id".to_string(), Value::String(user_id));
        }
        if let Some(conversation_id) = self.conversation_id {
            obj.insert("conversation_id".to_string(), Value::String(conversation_id));
        }
        if let Some(stream) = self.stream {
            obj.insert("stream".to_string(), Value::Bool(stream));
        }
        if let Some(timeout) = self.timeout {
            obj.insert("timeout_seconds".to_string(), serde_json::json!(timeout.num_seconds()));
        }
        payload
    }
}

/// Rejects an oversized `initial_state` before any HTTP call, per testable
/// property 11.
fn validate_initial_state(initial_state: &Option<Value>) -> Result<(), WorkflowError> {
    if let Some(state) = initial_state {
        check_state_size(state)?;
    }
    Ok(())
}

fn replay_output<T: DeserializeOwned>(record: &StepRecord) -> Result<T, WorkflowError> {
    match record.status {
        StepStatus::Success => {
            let value = record.outputs.clone().unwrap_or(Value::Null);
            serde_json::from_value(value).map_err(|e| WorkflowError::Validation(e.to_string()))
        }
        StepStatus::Failed => Err(WorkflowError::Step(record.to_step_error().expect("failed record"))),
    }
}

/// Raises a validation error before any HTTP call when `initial_state`
/// exceeds the configured byte limit (property 11).
pub fn check_state_size(state: &Value) -> Result<Value, WorkflowError> {
    serialize_with_limit(state, MAX_STATE_BYTES).map_err(|e| WorkflowError::Validation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use polos_client::testing::InMemoryOrchestrator;
    use polos_contracts::{ExecutionContext, ExecutionLineage};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn handle(client: Arc<InMemoryOrchestrator>) -> ExecutionHandle {
        let context = ExecutionContext {
            workflow_id: "wf".into(),
            execution_id: "exec-1".into(),
            deployment_id: "dep".into(),
            lineage: ExecutionLineage {
                parent_execution_id: None,
                root_workflow_id: "wf".into(),
                root_execution_id: "exec-1".into(),
            },
            session_id: None,
            user_id: None,
            conversation_id: None,
            created_at: Utc::now(),
            retry_count: 0,
            inbound_traceparent: None,
            previous_resume_span_id: None,
        };
        let (_tx, rx) = tokio::sync::watch::channel(false);
        ExecutionHandle::new(context, client, rx, Duration::from_secs(10))
    }

    #[tokio::test]
    async fn run_memoizes_across_calls() {
        let client = Arc::new(InMemoryOrchestrator::new());
        let h = handle(client);
        let calls = Arc::new(AtomicU32::new(0));
        let c2 = calls.clone();
        let first: i64 = h
            .run("x", move || {
                let c = c2.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(first, 7);
        let c3 = calls.clone();
        let second: i64 = h
            .run("x", move || {
                let c = c3.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(second, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn run_failure_sticks_and_never_reinvokes() {
        let client = Arc::new(InMemoryOrchestrator::new());
        let h = handle(client);
        let calls = Arc::new(AtomicU32::new(0));
        let c2 = calls.clone();
        let result: Result<i64, WorkflowError> = h
            .run_with_retries("y", 0, move || {
                let c = c2.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(StepExecutionError::new("boom"))
                }
            })
            .await;
        assert!(result.is_err());
        let c3 = calls.clone();
        let second: Result<i64, WorkflowError> = h
            .run_with_retries("y", 0, move || {
                let c = c3.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                }
            })
            .await;
        assert!(matches!(second, Err(WorkflowError::Step(e)) if e.message == "boom"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wait_for_beyond_threshold_raises_wait_and_writes_record() {
        let client = Arc::new(InMemoryOrchestrator::new());
        let h = handle(client.clone());
        let result = h.wait_for("nap", chrono::Duration::minutes(5)).await;
        assert!(matches!(result, Err(WorkflowError::Wait(_))));
    }

    #[tokio::test]
    async fn wait_for_past_target_fails_deterministically() {
        let client = Arc::new(InMemoryOrchestrator::new());
        let h = handle(client);
        let result = h.wait_until("nap", Utc::now() - chrono::Duration::seconds(5)).await;
        assert!(matches!(result, Err(WorkflowError::Step(_))));
    }

    #[tokio::test]
    async fn suspend_then_resume_round_trips_through_events() {
        let client = Arc::new(InMemoryOrchestrator::new());
        let h = handle(client.clone());
        let result: Result<Value, WorkflowError> = h.suspend("approval", serde_json::json!({"ask": "ok?"}), None).await;
        assert!(matches!(result, Err(WorkflowError::Wait(ref w)) if w.record.wait_type == WaitType::Suspend));
    }

    #[tokio::test]
    async fn uuid_is_stable_under_replay() {
        let client = Arc::new(InMemoryOrchestrator::new());
        let h = handle(client);
        let first = h.uuid("id").await.unwrap();
        let second = h.uuid("id").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn invoke_rejects_oversized_initial_state_before_any_call() {
        let client = Arc::new(InMemoryOrchestrator::new());
        let h = handle(client.clone());
        let oversized = Value::String("x".repeat(MAX_STATE_BYTES + 1));
        let result = h.invoke("spawn", "child-wf", Value::Null, Some(oversized)).await;
        assert!(matches!(result, Err(WorkflowError::Validation(_))));
        assert!(client.submitted_workflows().is_empty());
    }

    #[tokio::test]
    async fn invoke_accepts_initial_state_within_limit() {
        let client = Arc::new(InMemoryOrchestrator::new());
        let h = handle(client);
        let state = serde_json::json!({"cursor": 0});
        let result = h.invoke("spawn", "child-wf", Value::Null, Some(state)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn agent_invoke_builds_conventional_payload_and_delegates() {
        let client = Arc::new(InMemoryOrchestrator::new());
        let h = handle(client.clone());
        let mut config = AgentRunConfig::new("support-agent", serde_json::json!("hello"));
        config.session_id = Some("sess-1".to_string());
        let result = h.agent_invoke("spawn_agent", config).await;
        assert!(result.is_ok());
        let submitted = client.submitted_workflows();
        let (workflow_id, req) = submitted.last().expect("one submission recorded");
        assert_eq!(workflow_id, "support-agent");
        assert_eq!(req.payload["input"], serde_json::json!("hello"));
        assert_eq!(req.payload["session_id"], serde_json::json!("sess-1"));
    }
}
