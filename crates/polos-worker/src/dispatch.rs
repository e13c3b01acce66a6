//! Execution dispatch (§4.7): accepts one pushed execution, runs it through
//! `UnitRegistry::dispatch`, and reports the outcome back to the
//! orchestrator. Grounded in `durable::worker::pool::WorkerPool`'s
//! `tokio::spawn` task body (acquire a semaphore permit, run the handler,
//! report the result, release the permit) with the poll loop's "claim a
//! task" step replaced by "accept a pushed request".

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use polos_client::types::{ReportFailureRequest, ReportSuccessRequest};
use polos_client::OrchestratorClient;
use polos_contracts::step::RecordedError;
use polos_contracts::{ExecutionContext, ExecutionLineage, TraceParent, UnitKind};
use polos_runtime::workflow::UnitOutcome;
use polos_runtime::ExecutionHandle;
use polos_runtime::WorkflowError;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::server::AppState;

/// The pushed execution payload, per §4.7's `/execute` contract: enough of
/// `ExecutionContext` to reconstruct it worker-side, plus the unit's payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteRequest {
    pub execution_id: String,
    pub workflow_id: String,
    pub deployment_id: String,
    #[serde(default)]
    pub worker_id: Option<String>,
    pub payload: Value,
    pub parent_execution_id: Option<String>,
    pub root_execution_id: Option<String>,
    pub root_workflow_id: Option<String>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub traceparent: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    pub previous_resume_span_id: Option<String>,
}

/// Per-execution cancellation senders, keyed by execution id, so `/cancel`
/// can signal the one in-flight `dispatch_execution` task racing that
/// execution's handler against this signal (see `wait_for_cancel`).
#[derive(Default)]
pub struct CancellationTable {
    senders: Mutex<HashMap<String, watch::Sender<bool>>>,
}

impl CancellationTable {
    pub fn register(&self, execution_id: &str) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        self.senders.lock().unwrap().insert(execution_id.to_string(), tx);
        rx
    }

    pub fn cancel(&self, execution_id: &str) -> bool {
        let senders = self.senders.lock().unwrap();
        match senders.get(execution_id) {
            Some(tx) => {
                tx.send(true).ok();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, execution_id: &str) {
        self.senders.lock().unwrap().remove(execution_id);
    }
}

fn build_context(req: &ExecuteRequest) -> ExecutionContext {
    let root_execution_id = req.root_execution_id.clone().unwrap_or_else(|| req.execution_id.clone());
    let root_workflow_id = req.root_workflow_id.clone().unwrap_or_else(|| req.workflow_id.clone());
    let inbound_traceparent = req.traceparent.as_deref().and_then(|h| TraceParent::parse(h).ok());

    ExecutionContext {
        workflow_id: req.workflow_id.clone(),
        execution_id: req.execution_id.clone(),
        deployment_id: req.deployment_id.clone(),
        lineage: ExecutionLineage {
            parent_execution_id: req.parent_execution_id.clone(),
            root_workflow_id,
            root_execution_id,
        },
        session_id: req.session_id.clone(),
        user_id: req.user_id.clone(),
        conversation_id: req.conversation_id.clone(),
        created_at: Utc::now(),
        retry_count: req.retry_count,
        inbound_traceparent,
        previous_resume_span_id: req.previous_resume_span_id.clone(),
    }
}

/// Runs one execution to completion (or to its first suspend point) and
/// reports the outcome, per §4.7. Always releases its semaphore permit and
/// cancellation-table entry on every exit path.
pub async fn dispatch_execution(state: Arc<AppState>, req: ExecuteRequest, _permit: tokio::sync::OwnedSemaphorePermit) {
    let execution_id = req.execution_id.clone();
    let workflow_id = req.workflow_id.clone();
    let cancel_rx = state.cancellations.register(&execution_id);
    let mut race_rx = cancel_rx.clone();

    let context = build_context(&req);
    let handle = ExecutionHandle::new(context, state.client.clone(), cancel_rx, state.config.wait_threshold);
    let cancel_handle = handle.clone();
    let kind_name = state.units.get(&workflow_id).map(|u| kind_label(u.descriptor.kind)).unwrap_or("workflow");

    // Cancellation races the handler rather than being polled from inside it:
    // a cancel arriving mid-LLM-call (S6) drops the in-flight dispatch future
    // outright instead of waiting for it to next check `is_cancelled()`.
    let outcome = tokio::select! {
        outcome = state.units.dispatch(&workflow_id, handle, req.payload) => outcome,
        _ = wait_for_cancel(&mut race_rx) => UnitOutcome::Failed(WorkflowError::Cancelled),
    };
    state.cancellations.remove(&execution_id);

    // A suspended execution may resume on this or another worker and still
    // needs its sandbox; only a terminal outcome releases it.
    if !matches!(outcome, UnitOutcome::Waiting(_)) {
        if let Some(sandboxes) = &state.sandboxes {
            sandboxes.on_execution_complete(&execution_id).await;
        }
    }

    match outcome {
        UnitOutcome::Completed(result) => {
            let req = ReportSuccessRequest {
                result: result.result,
                output_schema_name: result.output_schema_name,
                final_state: result.final_state,
                worker_id: state.worker_id(),
            };
            if let Err(e) = state.client.report_success(&execution_id, req).await {
                warn!(%execution_id, %e, "failed to report success to orchestrator");
            }
        }
        UnitOutcome::Waiting(signal) => {
            // The step primitive that raised `Wait` already persisted the
            // wait record and span id before unwinding here; nothing left to
            // report. This execution resumes on a future push once its wait
            // condition clears.
            info!(%execution_id, wait_type = ?signal.wait_type, step_key = %signal.step_key, "execution suspended");
        }
        UnitOutcome::Failed(WorkflowError::Cancelled) => {
            cancel_handle
                .publish_workflow_event(
                    &format!("__{kind_name}_cancel"),
                    serde_json::json!({"workflow_id": workflow_id}),
                    Some(&format!("{kind_name}_cancel")),
                )
                .await
                .ok();
            if let Err(e) = state.client.confirm_cancellation(&execution_id, &state.worker_id()).await {
                warn!(%execution_id, %e, "failed to confirm cancellation to orchestrator");
            }
            // Cancellation is neither success nor failure: no report is sent,
            // matching the orchestrator's expectation of zero terminal
            // reports for a confirmed cancellation.
        }
        UnitOutcome::Failed(err) => {
            let retryable = err.retryable();
            let req = ReportFailureRequest {
                error: RecordedError { message: err.to_string(), error_type: None },
                stack: None,
                retryable,
                final_state: None,
                worker_id: state.worker_id(),
            };
            if let Err(e) = state.client.report_failure(&execution_id, req).await {
                warn!(%execution_id, %e, "failed to report failure to orchestrator");
            }
        }
    }
}

async fn wait_for_cancel(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

fn kind_label(kind: UnitKind) -> &'static str {
    match kind {
        UnitKind::Workflow => "workflow",
        UnitKind::Agent => "agent",
        UnitKind::Tool => "tool",
    }
}
