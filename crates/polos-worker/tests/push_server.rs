//! Drives the push server's axum router in-process via
//! `tower::ServiceExt::oneshot`, per §13's test-tooling note for this crate.

use std::sync::atomic::AtomicU64;
use std::sync::{Arc, RwLock};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::StreamExt;
use polos_client::testing::InMemoryOrchestrator;
use polos_client::types::StreamTarget;
use polos_client::{ClientConfig, OrchestratorClient};
use polos_contracts::{UnitKind, WorkflowDescriptor};
use polos_runtime::schema::SchemaRegistry;
use polos_runtime::workflow::{Unit, UnitRegistry};
use polos_worker::config::WorkerConfig;
use polos_worker::dispatch::CancellationTable;
use polos_worker::server::{app, AppState};
use serde_json::{json, Value};
use tower::ServiceExt;

fn echo_unit() -> Unit {
    let descriptor = WorkflowDescriptor::new("echo", UnitKind::Workflow);
    let handler: polos_runtime::workflow::HandlerFn = Arc::new(|_handle, payload| Box::pin(async move { Ok(payload) }));
    Unit { descriptor, handler }
}

/// Never resolves: stands in for an agent mid-LLM-call when `/cancel` arrives.
fn blocking_unit() -> Unit {
    let descriptor = WorkflowDescriptor::new("blocker", UnitKind::Agent);
    let handler: polos_runtime::workflow::HandlerFn = Arc::new(|_handle, _payload| {
        Box::pin(async move { std::future::pending::<Result<Value, polos_runtime::WorkflowError>>().await })
    });
    Unit { descriptor, handler }
}

fn test_config() -> WorkerConfig {
    WorkerConfig {
        client: ClientConfig::builder()
            .api_url("http://localhost:8080")
            .project_id("proj")
            .deployment_id("dep")
            .build()
            .unwrap(),
        server_url: "http://localhost:9000".into(),
        bind_addr: "0.0.0.0:9000".into(),
        max_concurrent_workflows: 2,
        wait_threshold: std::time::Duration::from_secs(10),
        heartbeat_interval: std::time::Duration::from_secs(30),
        agent_max_steps: 10,
        sandbox_workspaces_dir: "/tmp/polos-test/workspaces".into(),
        sandbox_sweep_interval: std::time::Duration::from_secs(600),
        sandbox_orphan_grace: std::time::Duration::from_secs(1800),
    }
}

fn test_state() -> Arc<AppState> {
    test_state_with_units(vec![echo_unit()]).0
}

fn test_state_with_units(units: Vec<Unit>) -> (Arc<AppState>, Arc<InMemoryOrchestrator>) {
    let client = Arc::new(InMemoryOrchestrator::new());
    let state = Arc::new(AppState {
        units: UnitRegistry::new(units, SchemaRegistry::new()),
        client: client.clone(),
        config: Arc::new(test_config()),
        worker_id: RwLock::new("worker-test".into()),
        semaphore: Arc::new(tokio::sync::Semaphore::new(2)),
        cancellations: CancellationTable::default(),
        accepted: AtomicU64::new(0),
        sandboxes: None,
    });
    (state, client)
}

#[tokio::test]
async fn health_reports_capacity() {
    let state = test_state();
    let response = app(state).oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["mode"], "push");
    assert_eq!(json["max_concurrent_workflows"], 2);
    assert_eq!(json["current_executions"], 0);
}

#[tokio::test]
async fn execute_unknown_workflow_is_rejected() {
    let state = test_state();
    let req = json!({
        "execution_id": "exec-1",
        "workflow_id": "does-not-exist",
        "deployment_id": "dep",
        "payload": {},
    });
    let response = app(state)
        .oneshot(Request::builder().method("POST").uri("/execute").header("content-type", "application/json").body(Body::from(req.to_string())).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn execute_known_workflow_is_accepted_and_completes() {
    let state = test_state();
    let req = json!({
        "execution_id": "exec-2",
        "workflow_id": "echo",
        "deployment_id": "dep",
        "payload": {"hello": "world"},
    });
    let response = app(state.clone())
        .oneshot(Request::builder().method("POST").uri("/execute").header("content-type", "application/json").body(Body::from(req.to_string())).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    // The dispatch task is spawned; give it a moment to report completion to
    // the in-memory orchestrator before checking.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let snapshot = state.client.get_execution("exec-2").await.unwrap();
    assert_eq!(snapshot.status, "succeeded");
    assert_eq!(snapshot.result, Some(json!({"hello": "world"})));
}

#[tokio::test]
async fn cancelling_a_blocked_execution_confirms_cancellation_and_sends_no_report() {
    let (state, client) = test_state_with_units(vec![blocking_unit()]);
    let req = json!({
        "execution_id": "exec-cancel",
        "workflow_id": "blocker",
        "deployment_id": "dep",
        "payload": {},
    });
    let response = app(state.clone())
        .oneshot(Request::builder().method("POST").uri("/execute").header("content-type", "application/json").body(Body::from(req.to_string())).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    // Give the dispatch task a moment to register its cancellation receiver
    // before the cancel request races it.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let response = app(state.clone())
        .oneshot(Request::builder().method("POST").uri("/cancel/exec-cancel").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(client.cancellation_confirmed("exec-cancel"));

    let stream = client
        .stream_events(
            StreamTarget::WorkflowRun { workflow_id: "blocker".into(), workflow_run_id: "exec-cancel".into() },
            None,
        )
        .await
        .unwrap();
    let events: Vec<_> = stream.collect::<Vec<_>>().await.into_iter().map(|e| e.unwrap()).collect();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type.as_ref().map(|t| t.to_string()), Some("agent_cancel".to_string()));

    // No success or failure report was ever sent for a cancelled execution.
    assert!(client.get_execution("exec-cancel").await.is_err());
}

#[tokio::test]
async fn cancel_unknown_execution_is_not_found() {
    let state = test_state();
    let response = app(state)
        .oneshot(Request::builder().method("POST").uri("/cancel/not-running").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
