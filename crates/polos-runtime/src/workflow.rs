//! Workflow core (C4): the unit registry and the seven-step lifecycle shared
//! by workflows, agents, and tools.
//!
//! Grounded in `durable::engine::registry::UnitRegistry` for the "register
//! once at startup, dispatch by string id" shape, and in §4.3's lifecycle
//! description for the step sequence itself.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use polos_contracts::{UnitKind, WorkflowDescriptor};
use serde_json::Value;
use tracing::{error, instrument, warn};

use crate::context::ExecutionHandle;
use crate::error::WorkflowError;
use crate::schema::SchemaRegistry;
use crate::wait::WaitSignal;

/// The outcome a completed (non-waiting) unit invocation produces.
pub struct UnitResult {
    pub result: Value,
    pub output_schema_name: Option<String>,
    pub final_state: Option<Value>,
}

/// What running a unit to completion settles into, from the dispatcher's
/// point of view: it finished, it raised `Wait` and must be parked, or it
/// failed outright.
pub enum UnitOutcome {
    Completed(UnitResult),
    Waiting(WaitSignal),
    Failed(WorkflowError),
}

pub type HandlerFn =
    Arc<dyn Fn(ExecutionHandle, Value) -> Pin<Box<dyn Future<Output = Result<Value, WorkflowError>> + Send>> + Send + Sync>;

/// A registered workflow/agent/tool: its descriptor plus the handler closure
/// user code supplied at `#[workflow]`/`#[agent]`/`#[tool]` registration time.
#[derive(Clone)]
pub struct Unit {
    pub descriptor: WorkflowDescriptor,
    pub handler: HandlerFn,
}

/// Process-wide table of registered units, built once at startup (§4.3,
/// "Registration"). Grounded in the teacher's `engine::registry` pattern of a
/// plain `HashMap` behind a handle that's cheap to clone and share across the
/// worker's dispatch tasks.
#[derive(Default, Clone)]
pub struct UnitRegistry {
    units: Arc<HashMap<String, Unit>>,
    schemas: Arc<SchemaRegistry>,
}

impl UnitRegistry {
    pub fn new(units: Vec<Unit>, schemas: SchemaRegistry) -> Self {
        let mut map = HashMap::new();
        for unit in units {
            map.insert(unit.descriptor.id.clone(), unit);
        }
        Self {
            units: Arc::new(map),
            schemas: Arc::new(schemas),
        }
    }

    pub fn get(&self, workflow_id: &str) -> Option<&Unit> {
        self.units.get(workflow_id)
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &WorkflowDescriptor> {
        self.units.values().map(|u| &u.descriptor)
    }

    /// Runs one unit through the full lifecycle, per §4.3:
    ///
    /// 1. validate/convert the payload against its schema, 2. open the root
    /// span and publish `{kind}_start`, 3. invoke the handler, 4. on success,
    /// publish `{kind}_finish` and return the result; on `Wait`, mark the
    /// span waiting and persist its id before re-raising; on any other
    /// error, mark the span failed and re-raise.
    #[instrument(skip(self, handle, payload), fields(execution_id = %handle.context().execution_id))]
    pub async fn dispatch(&self, workflow_id: &str, handle: ExecutionHandle, payload: Value) -> UnitOutcome {
        let Some(unit) = self.get(workflow_id) else {
            return UnitOutcome::Failed(WorkflowError::Validation(format!("unknown unit: {workflow_id}")));
        };

        if let Err(e) = crate::step::check_state_size(&payload) {
            return UnitOutcome::Failed(e);
        }
        if let Some(schema_name) = &unit.descriptor.payload_schema_name {
            if let Err(e) = self.schemas.validate(schema_name, &payload) {
                return UnitOutcome::Failed(WorkflowError::Validation(e.to_string()));
            }
        }

        let kind_name = kind_label(unit.descriptor.kind);
        handle
            .spans()
            .start_span(&unit.descriptor.id, kind_name, payload.clone())
            .await;
        handle
            .publish_workflow_event(
                &format!("__{kind_name}_start"),
                serde_json::json!({"workflow_id": workflow_id}),
                Some(&format!("{kind_name}_start")),
            )
            .await
            .ok();

        // `on_start`/`on_end` hooks are resolved by name and invoked by the
        // agent/tool layer that owns the callable registry; the core only
        // guarantees the span/event bracketing they run inside of.
        let outcome = (unit.handler)(handle.clone(), payload).await;

        match outcome {
            Ok(result) => {
                if let Some(schema_name) = &unit.descriptor.result_schema_name {
                    if let Err(e) = self.schemas.validate(schema_name, &result) {
                        let err = WorkflowError::Unserializable(e.to_string());
                        handle
                            .spans()
                            .end_span(None, Some(serde_json::json!({"message": err.to_string()})))
                            .await;
                        return UnitOutcome::Failed(err);
                    }
                }
                let final_state = Some(handle.state().await);
                handle.spans().end_span(Some(result.clone()), None).await;
                handle
                    .publish_workflow_event(
                        &format!("__{kind_name}_finish"),
                        serde_json::json!({"workflow_id": workflow_id, "result": result}),
                        Some(&format!("{kind_name}_finish")),
                    )
                    .await
                    .ok();
                UnitOutcome::Completed(UnitResult {
                    result,
                    output_schema_name: unit.descriptor.result_schema_name.clone(),
                    final_state,
                })
            }
            Err(WorkflowError::Wait(signal)) => {
                // The span stays open across a wait: it resumes (rather than
                // re-opens) when the dispatcher re-invokes this unit after
                // the wait condition clears, so we only persist its id here.
                if let Some(span_id) = handle.spans().current_span_id().await {
                    if let Err(e) = handle.client().update_otel_span_id(&handle.context().execution_id, &span_id).await {
                        warn!(%e, "failed to persist waiting span id");
                    }
                }
                UnitOutcome::Waiting(signal)
            }
            Err(err) => {
                error!(%err, "unit failed");
                handle
                    .spans()
                    .end_span(None, Some(serde_json::json!({"message": err.to_string()})))
                    .await;
                UnitOutcome::Failed(err)
            }
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use polos_client::testing::InMemoryOrchestrator;
    use polos_contracts::{ExecutionContext, ExecutionLineage};
    use std::time::Duration;

    fn handle(client: Arc<InMemoryOrchestrator>) -> ExecutionHandle {
        let context = ExecutionContext {
            workflow_id: "echo".into(),
            execution_id: "exec-1".into(),
            deployment_id: "dep".into(),
            lineage: ExecutionLineage {
                parent_execution_id: None,
                root_workflow_id: "echo".into(),
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

    fn echo_unit() -> Unit {
        Unit {
            descriptor: WorkflowDescriptor::new("echo", UnitKind::Workflow),
            handler: Arc::new(|_handle, payload| Box::pin(async move { Ok(payload) })),
        }
    }

    fn failing_unit() -> Unit {
        Unit {
            descriptor: WorkflowDescriptor::new("boom", UnitKind::Workflow),
            handler: Arc::new(|_handle, _payload| {
                Box::pin(async move { Err(WorkflowError::Validation("nope".into())) })
            }),
        }
    }

    #[tokio::test]
    async fn successful_dispatch_returns_payload_as_result() {
        let client = Arc::new(InMemoryOrchestrator::new());
        let registry = UnitRegistry::new(vec![echo_unit()], SchemaRegistry::new());
        let h = handle(client);
        let outcome = registry.dispatch("echo", h, serde_json::json!({"x": 1})).await;
        match outcome {
            UnitOutcome::Completed(r) => assert_eq!(r.result, serde_json::json!({"x": 1})),
            _ => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn failing_handler_yields_failed_outcome() {
        let client = Arc::new(InMemoryOrchestrator::new());
        let registry = UnitRegistry::new(vec![failing_unit()], SchemaRegistry::new());
        let h = handle(client);
        let outcome = registry.dispatch("boom", h, serde_json::json!({})).await;
        assert!(matches!(outcome, UnitOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn unknown_unit_fails_before_any_span_is_opened() {
        let client = Arc::new(InMemoryOrchestrator::new());
        let registry = UnitRegistry::new(vec![], SchemaRegistry::new());
        let h = handle(client);
        let outcome = registry.dispatch("missing", h, serde_json::json!({})).await;
        assert!(matches!(outcome, UnitOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn payload_schema_violation_is_rejected_before_dispatch() {
        let client = Arc::new(InMemoryOrchestrator::new());
        let mut descriptor = WorkflowDescriptor::new("echo", UnitKind::Workflow);
        descriptor.payload_schema_name = Some("Payload".into());
        let schemas = SchemaRegistry::new();
        schemas.register("Payload", serde_json::json!({"type": "object", "required": ["x"]}));
        let unit = Unit {
            descriptor,
            handler: Arc::new(|_h, payload| Box::pin(async move { Ok(payload) })),
        };
        let registry = UnitRegistry::new(vec![unit], schemas);
        let h = handle(client);
        let outcome = registry.dispatch("echo", h, serde_json::json!({"y": 1})).await;
        assert!(matches!(outcome, UnitOutcome::Failed(_)));
    }
}
