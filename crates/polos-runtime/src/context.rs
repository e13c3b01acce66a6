//! Execution context (C2): the per-execution identity plus the mutable,
//! user-typed workflow state and the scoped resources (orchestrator client,
//! span buffer, cancellation signal) step primitives need.
//!
//! Grounded in the teacher's "inject the store, don't look it up ambiently"
//! idiom (`durable::engine::WorkflowExecutor` holds its `Arc<S>` directly) and
//! §9's "Global registries" note: the step engine receives the orchestrator
//! client through this context rather than through thread-local lookup.

use std::sync::Arc;

use polos_client::OrchestratorClient;
use polos_contracts::ExecutionContext;
use serde_json::Value;
use tokio::sync::{watch, Mutex};

use crate::telemetry::SpanBuffer;

struct Inner {
    context: ExecutionContext,
    client: Arc<dyn OrchestratorClient>,
    spans: SpanBuffer,
    state: Mutex<Value>,
    cancelled: watch::Receiver<bool>,
    wait_threshold: std::time::Duration,
}

/// A cheaply-clonable handle to one execution's identity and resources.
/// Step primitives within one execution are called sequentially by user code
/// (§5), so the interior mutability here only needs to be `Send`, not lock-free.
#[derive(Clone)]
pub struct ExecutionHandle(Arc<Inner>);

impl ExecutionHandle {
    pub fn new(
        context: ExecutionContext,
        client: Arc<dyn OrchestratorClient>,
        cancelled: watch::Receiver<bool>,
        wait_threshold: std::time::Duration,
    ) -> Self {
        let spans = SpanBuffer::new(&context.lineage.root_execution_id);
        Self(Arc::new(Inner {
            context,
            client,
            spans,
            state: Mutex::new(Value::Null),
            cancelled,
            wait_threshold,
        }))
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.0.context
    }

    pub fn client(&self) -> &Arc<dyn OrchestratorClient> {
        &self.0.client
    }

    pub fn spans(&self) -> &SpanBuffer {
        &self.0.spans
    }

    pub fn wait_threshold(&self) -> std::time::Duration {
        self.0.wait_threshold
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.cancelled.borrow()
    }

    pub fn workflow_topic(&self) -> String {
        self.0.context.workflow_topic()
    }

    /// Replaces the typed workflow state wholesale. Called once at handler
    /// entry (C4 step 1) after constructing the initial state from schema
    /// defaults or the supplied `initial_state`.
    pub async fn set_state(&self, state: Value) {
        *self.0.state.lock().await = state;
    }

    pub async fn state(&self) -> Value {
        self.0.state.lock().await.clone()
    }

    pub async fn update_state<F: FnOnce(&mut Value)>(&self, f: F) {
        let mut guard = self.0.state.lock().await;
        f(&mut guard);
    }
}
