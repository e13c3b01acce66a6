//! The push server (§4.7): an axum router exposing `/execute`, `/cancel/:id`,
//! and `/health`, grounded in §13's note that `polos-worker` drives this
//! router in-process via `tower::ServiceExt::oneshot` for tests, the same way
//! `everruns-everruns`'s HTTP-facing crates structure their axum apps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use polos_client::OrchestratorClient;
use polos_runtime::workflow::UnitRegistry;
use polos_sandbox::SandboxManager;
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::config::WorkerConfig;
use crate::dispatch::{dispatch_execution, CancellationTable, ExecuteRequest};

pub struct AppState {
    pub units: UnitRegistry,
    pub client: Arc<dyn OrchestratorClient>,
    pub config: Arc<WorkerConfig>,
    pub worker_id: RwLock<String>,
    pub semaphore: Arc<tokio::sync::Semaphore>,
    pub cancellations: CancellationTable,
    pub accepted: AtomicU64,
    pub sandboxes: Option<Arc<SandboxManager>>,
}

impl AppState {
    pub fn active_executions(&self) -> u32 {
        self.config.max_concurrent_workflows - self.semaphore.available_permits() as u32
    }

    /// The worker's current ID. Reassigned in place after a heartbeat
    /// `re_register` response, so callers must re-read rather than cache it.
    pub fn worker_id(&self) -> String {
        self.worker_id.read().unwrap().clone()
    }

    pub fn set_worker_id(&self, worker_id: String) {
        *self.worker_id.write().unwrap() = worker_id;
    }
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/execute", post(execute))
        .route("/cancel/:execution_id", post(cancel))
        .route("/health", get(health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Optional worker-ID payload accepted on `/cancel`, per §6: the header takes
/// precedence but a body field is also honored.
#[derive(Debug, Default, Deserialize)]
struct CancelBody {
    #[serde(default)]
    worker_id: Option<String>,
}

fn worker_id_mismatch(state: &AppState, provided: Option<&str>) -> bool {
    matches!(provided, Some(id) if id != state.worker_id())
}

async fn execute(State(state): State<Arc<AppState>>, Json(req): Json<ExecuteRequest>) -> impl IntoResponse {
    if worker_id_mismatch(&state, req.worker_id.as_deref()) {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "worker id mismatch"}))).into_response();
    }

    if state.units.get(&req.workflow_id).is_none() {
        return (StatusCode::NOT_FOUND, Json(json!({"error": format!("unknown unit: {}", req.workflow_id)}))).into_response();
    }

    let Ok(permit) = state.semaphore.clone().try_acquire_owned() else {
        return (StatusCode::TOO_MANY_REQUESTS, Json(json!({"error": "at capacity"}))).into_response();
    };

    state.accepted.fetch_add(1, Ordering::Relaxed);
    let execution_id = req.execution_id.clone();
    let spawned_state = state.clone();
    tokio::spawn(async move {
        dispatch_execution(spawned_state, req, permit).await;
    });

    (StatusCode::ACCEPTED, Json(json!({"status": "accepted", "execution_id": execution_id}))).into_response()
}

async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(execution_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let header_worker_id = headers.get("X-Worker-ID").and_then(|v| v.to_str().ok()).map(str::to_string);
    let body_worker_id = if body.is_empty() {
        None
    } else {
        serde_json::from_slice::<CancelBody>(&body).ok().and_then(|b| b.worker_id)
    };
    let provided = header_worker_id.or(body_worker_id);

    if worker_id_mismatch(&state, provided.as_deref()) {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "worker id mismatch"}))).into_response();
    }

    if state.cancellations.cancel(&execution_id) {
        (StatusCode::OK, Json(json!({"status": "cancellation_requested", "execution_id": execution_id}))).into_response()
    } else {
        (StatusCode::NOT_FOUND, Json(json!({"error": "execution not running on this worker"}))).into_response()
    }
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "mode": "push",
        "current_executions": state.active_executions(),
        "max_concurrent_workflows": state.config.max_concurrent_workflows,
    }))
}
