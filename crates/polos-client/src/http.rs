//! `reqwest`-backed `OrchestratorClient`.
//!
//! Grounded in the teacher's HTTP adapter shape (`everruns-worker::client`'s
//! `TemporalClient`, minus the Temporal-specific parts since this runtime
//! talks to a plain HTTP+SSE orchestrator, not a Temporal cluster) and the
//! auth header pattern implied by §11's config table (`Authorization: Bearer`
//! unless `POLOS_LOCAL_MODE` + a localhost URL).

use std::collections::HashSet;

use async_trait::async_trait;
use polos_contracts::{ClientError, Event, StepRecord, WaitRecord};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::instrument;

use crate::backoff::BackoffPolicy;
use crate::client_trait::OrchestratorClient;
use crate::config::ClientConfig;
use crate::stream::EventStream;
use crate::types::*;

pub struct HttpOrchestratorClient {
    http: reqwest::Client,
    config: ClientConfig,
    report_backoff: BackoffPolicy,
}

impl HttpOrchestratorClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            report_backoff: BackoffPolicy::default(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .request(method, self.url(path))
            .header("Content-Type", "application/json")
            .header("X-Project-ID", &self.config.project_id);
        if self.config.requires_auth() {
            if let Some(key) = &self.config.api_key {
                req = req.bearer_auth(key);
            }
        }
        req
    }

    async fn send_json<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ClientError> {
        let mut req = self.request(method, path);
        if let Some(body) = body {
            req = req.json(body);
        }
        let response = req
            .send()
            .await
            .map_err(|e| ClientError::Transient(e.to_string()))?;
        Self::handle_response(response).await
    }

    async fn send_json_no_body<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
    ) -> Result<T, ClientError> {
        self.send_json::<(), T>(method, path, None).await
    }

    async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
        let status = response.status();
        if status == StatusCode::CONFLICT {
            return Err(ClientError::Conflict);
        }
        if status == StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::NotFound(body));
        }
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Permanent(format!("{status}: {body}")));
        }
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Transient(format!("{status}: {body}")));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ClientError::Serialization(e.to_string()))
    }
}

#[derive(serde::Deserialize)]
struct Empty {}

#[async_trait]
impl OrchestratorClient for HttpOrchestratorClient {
    #[instrument(skip(self, req))]
    async fn register_worker(&self, req: RegisterWorkerRequest) -> Result<String, ClientError> {
        let resp: RegisterWorkerResponse = self
            .send_json(Method::POST, "/workers/register", Some(&req))
            .await?;
        Ok(resp.worker_id)
    }

    async fn mark_online(&self, worker_id: &str) -> Result<(), ClientError> {
        self.send_json_no_body::<Empty>(Method::POST, &format!("/workers/{worker_id}/online"))
            .await?;
        Ok(())
    }

    async fn heartbeat(&self, worker_id: &str) -> Result<HeartbeatResponse, ClientError> {
        self.send_json_no_body(Method::POST, &format!("/workers/{worker_id}/heartbeat"))
            .await
    }

    async fn register_deployment(&self, deployment_id: &str) -> Result<(), ClientError> {
        self.send_json_no_body::<Empty>(Method::POST, &format!("/deployments/{deployment_id}"))
            .await?;
        Ok(())
    }

    async fn register_agent(
        &self,
        deployment_id: &str,
        descriptor: serde_json::Value,
    ) -> Result<(), ClientError> {
        self.send_json::<_, Empty>(
            Method::POST,
            &format!("/deployments/{deployment_id}/agents"),
            Some(&descriptor),
        )
        .await?;
        Ok(())
    }

    async fn register_tool(
        &self,
        deployment_id: &str,
        descriptor: serde_json::Value,
    ) -> Result<(), ClientError> {
        self.send_json::<_, Empty>(
            Method::POST,
            &format!("/deployments/{deployment_id}/tools"),
            Some(&descriptor),
        )
        .await?;
        Ok(())
    }

    async fn register_deployment_workflow(
        &self,
        deployment_id: &str,
        workflow_id: &str,
        kind: &str,
        event_triggered: bool,
        scheduled: bool,
    ) -> Result<(), ClientError> {
        let body = serde_json::json!({
            "workflow_id": workflow_id,
            "kind": kind,
            "event_triggered": event_triggered,
            "scheduled": scheduled,
        });
        self.send_json::<_, Empty>(
            Method::POST,
            &format!("/deployments/{deployment_id}/workflows"),
            Some(&body),
        )
        .await?;
        Ok(())
    }

    async fn register_queues(&self, deployment_id: &str, queues: Vec<QueueSpec>) -> Result<(), ClientError> {
        self.send_json::<_, Empty>(
            Method::POST,
            &format!("/deployments/{deployment_id}/queues"),
            Some(&queues),
        )
        .await?;
        Ok(())
    }

    async fn register_event_trigger(
        &self,
        workflow_id: &str,
        trigger: serde_json::Value,
    ) -> Result<(), ClientError> {
        self.send_json::<_, Empty>(
            Method::POST,
            &format!("/workflows/{workflow_id}/event-trigger"),
            Some(&trigger),
        )
        .await?;
        Ok(())
    }

    async fn register_schedule(&self, workflow_id: &str, schedule: serde_json::Value) -> Result<(), ClientError> {
        self.send_json::<_, Empty>(
            Method::POST,
            &format!("/workflows/{workflow_id}/schedule"),
            Some(&schedule),
        )
        .await?;
        Ok(())
    }

    async fn submit_workflow(
        &self,
        workflow_id: &str,
        req: SubmitWorkflowRequest,
    ) -> Result<SubmitWorkflowResponse, ClientError> {
        self.send_json(Method::POST, &format!("/workflows/{workflow_id}/submit"), Some(&req))
            .await
    }

    async fn submit_workflows(
        &self,
        reqs: Vec<(String, SubmitWorkflowRequest)>,
    ) -> Result<Vec<SubmitWorkflowResponse>, ClientError> {
        let body: Vec<_> = reqs
            .into_iter()
            .map(|(workflow_id, req)| serde_json::json!({"workflow_id": workflow_id, "request": req}))
            .collect();
        self.send_json(Method::POST, "/workflows/submit-batch", Some(&body)).await
    }

    async fn get_step_output(&self, execution_id: &str, step_key: &str) -> Result<Option<StepRecord>, ClientError> {
        let path = format!("/executions/{execution_id}/steps/{step_key}");
        match self.send_json_no_body::<StepRecord>(Method::GET, &path).await {
            Ok(record) => Ok(Some(record)),
            Err(ClientError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn put_step_output(
        &self,
        execution_id: &str,
        step_key: &str,
        req: PutStepOutputRequest,
    ) -> Result<(), ClientError> {
        let path = format!("/executions/{execution_id}/steps/{step_key}");
        self.send_json::<_, Empty>(Method::PUT, &path, Some(&req)).await?;
        Ok(())
    }

    async fn set_waiting(&self, execution_id: &str, wait: WaitRecord) -> Result<(), ClientError> {
        let req = SetWaitingRequest { wait_record: wait };
        self.send_json::<_, Empty>(
            Method::PUT,
            &format!("/executions/{execution_id}/wait"),
            Some(&req),
        )
        .await?;
        Ok(())
    }

    async fn update_otel_span_id(&self, execution_id: &str, span_id: &str) -> Result<(), ClientError> {
        let body = serde_json::json!({"span_id": span_id});
        self.send_json::<_, Empty>(
            Method::PUT,
            &format!("/executions/{execution_id}/span"),
            Some(&body),
        )
        .await?;
        Ok(())
    }

    async fn publish_events(
        &self,
        topic: &str,
        events: Vec<PublishEventRequest>,
        execution_id: Option<&str>,
        root_execution_id: Option<&str>,
    ) -> Result<Vec<u64>, ClientError> {
        let body = serde_json::json!({
            "topic": topic,
            "events": events,
            "execution_id": execution_id,
            "root_execution_id": root_execution_id,
        });
        self.send_json(Method::POST, "/events/publish", Some(&body)).await
    }

    async fn stream_events(
        &self,
        target: StreamTarget,
        cursor: Option<StreamCursor>,
    ) -> Result<EventStream, ClientError> {
        let mut url = match &target {
            StreamTarget::Topic(topic) => self.url(&format!("/events/stream?topic={topic}")),
            StreamTarget::WorkflowRun {
                workflow_id,
                workflow_run_id,
            } => self.url(&format!(
                "/workflows/{workflow_id}/runs/{workflow_run_id}/stream"
            )),
        };
        if let Some(cursor) = cursor {
            let suffix = match cursor {
                StreamCursor::Sequence(seq) => format!("after_sequence={seq}"),
                StreamCursor::Timestamp(ts) => format!("after_timestamp={}", ts.to_rfc3339()),
            };
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(&suffix);
        }
        let mut req = self
            .http
            .get(url)
            .header("X-Project-ID", &self.config.project_id)
            .header("Accept", "text/event-stream");
        if self.config.requires_auth() {
            if let Some(key) = &self.config.api_key {
                req = req.bearer_auth(key);
            }
        }
        let response = req
            .send()
            .await
            .map_err(|e| ClientError::Transient(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ClientError::Transient(format!(
                "stream request failed: {}",
                response.status()
            )));
        }
        Ok(EventStream::from_byte_stream(response.bytes_stream()))
    }

    async fn get_execution(&self, execution_id: &str) -> Result<ExecutionSnapshot, ClientError> {
        self.send_json_no_body(Method::GET, &format!("/executions/{execution_id}"))
            .await
    }

    async fn cancel_execution(&self, execution_id: &str) -> Result<(), ClientError> {
        self.send_json_no_body::<Empty>(Method::POST, &format!("/executions/{execution_id}/cancel"))
            .await?;
        Ok(())
    }

    async fn confirm_cancellation(&self, execution_id: &str, worker_id: &str) -> Result<(), ClientError> {
        let body = serde_json::json!({"worker_id": worker_id});
        self.send_json::<_, Empty>(
            Method::POST,
            &format!("/executions/{execution_id}/cancel/confirm"),
            Some(&body),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, req))]
    async fn report_success(&self, execution_id: &str, req: ReportSuccessRequest) -> Result<(), ClientError> {
        self.report_backoff
            .retry(|| async {
                self.send_json::<_, Empty>(
                    Method::POST,
                    &format!("/executions/{execution_id}/success"),
                    Some(&req),
                )
                .await
                .map(|_| ())
            })
            .await
    }

    #[instrument(skip(self, req))]
    async fn report_failure(&self, execution_id: &str, req: ReportFailureRequest) -> Result<(), ClientError> {
        self.report_backoff
            .retry(|| async {
                self.send_json::<_, Empty>(
                    Method::POST,
                    &format!("/executions/{execution_id}/failure"),
                    Some(&req),
                )
                .await
                .map(|_| ())
            })
            .await
    }

    async fn get_session_memory(&self, session_id: &str) -> Result<SessionMemory, ClientError> {
        self.send_json_no_body(Method::GET, &format!("/sessions/{session_id}/memory"))
            .await
    }

    async fn put_session_memory(&self, session_id: &str, memory: SessionMemory) -> Result<(), ClientError> {
        self.send_json::<_, Empty>(
            Method::PUT,
            &format!("/sessions/{session_id}/memory"),
            Some(&memory),
        )
        .await?;
        Ok(())
    }

    async fn add_conversation_history(
        &self,
        conversation_id: &str,
        messages: Vec<serde_json::Value>,
    ) -> Result<(), ClientError> {
        self.send_json::<_, Empty>(
            Method::POST,
            &format!("/conversations/{conversation_id}/messages"),
            Some(&messages),
        )
        .await?;
        Ok(())
    }

    async fn get_conversation_history(
        &self,
        conversation_id: &str,
        window: Option<u32>,
    ) -> Result<Vec<serde_json::Value>, ClientError> {
        let path = match window {
            Some(w) => format!("/conversations/{conversation_id}/messages?window={w}"),
            None => format!("/conversations/{conversation_id}/messages"),
        };
        self.send_json_no_body(Method::GET, &path).await
    }

    async fn get_active_worker_ids(&self) -> Result<HashSet<String>, ClientError> {
        self.send_json_no_body(Method::GET, "/workers/active").await
    }
}
