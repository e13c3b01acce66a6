//! Guardrail and hook executors (C6, §4.5): `execute_hooks`/`execute_guardrails`
//! share one shape — each callable is its own durable `run` step keyed
//! `<group_name>.<fn_id>.<index>`, results are a `{CONTINUE, FAIL}` tagged
//! union carrying accumulated modifications, and a malformed result becomes a
//! synthetic `FAIL` so the outer caller always sees a valid outcome.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use polos_contracts::GuardrailRef;
use polos_providers::{GenerateRequest, HistoryEntry, Provider};
use polos_runtime::{ExecutionHandle, WorkflowError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AgentConfig;

/// Outcome of one hook/guardrail callable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Continue {
        #[serde(default)]
        modified: Option<Value>,
    },
    Fail {
        error: String,
    },
}

impl StepOutcome {
    fn fail(error: impl Into<String>) -> Self {
        StepOutcome::Fail { error: error.into() }
    }
}

#[async_trait]
pub trait HookFn: Send + Sync {
    fn id(&self) -> &str;
    async fn call(&self, ctx: Value) -> StepOutcome;
}

#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: Arc<HashMap<String, Arc<dyn HookFn>>>,
}

impl HookRegistry {
    pub fn builder() -> HookRegistryBuilder {
        HookRegistryBuilder::default()
    }

    fn get(&self, name: &str) -> Option<&Arc<dyn HookFn>> {
        self.hooks.get(name)
    }
}

#[derive(Default)]
pub struct HookRegistryBuilder {
    hooks: HashMap<String, Arc<dyn HookFn>>,
}

impl HookRegistryBuilder {
    pub fn with_hook(mut self, hook: Arc<dyn HookFn>) -> Self {
        self.hooks.insert(hook.id().to_string(), hook);
        self
    }

    pub fn build(self) -> HookRegistry {
        HookRegistry { hooks: Arc::new(self.hooks) }
    }
}

/// Runs every named hook in `group_name` sequentially, each as its own step
/// keyed `<group_name>.<fn_id>.<index>`, threading the most-recently-modified
/// context into the next callable. Returns the final context on success, or
/// the `FAIL` error string (never `Err`, matching §4.5's tagged-union result —
/// the caller decides whether a `FAIL` aborts the loop).
pub async fn execute_hooks(
    handle: &ExecutionHandle,
    group_name: &str,
    hook_names: &[String],
    registry: &HookRegistry,
    mut ctx: Value,
) -> Result<Value, String> {
    for (index, fn_id) in hook_names.iter().enumerate() {
        let step_key = format!("{group_name}.{fn_id}.{index}");
        let Some(hook) = registry.get(fn_id).cloned() else {
            return Err(format!("unregistered hook: {fn_id}"));
        };
        let ctx_snapshot = ctx.clone();
        let outcome: StepOutcome = handle
            .run(&step_key, move || {
                let hook = hook.clone();
                let ctx_snapshot = ctx_snapshot.clone();
                async move { Ok::<_, polos_contracts::StepExecutionError>(hook.call(ctx_snapshot).await) }
            })
            .await
            .map_err(|e| e.to_string())?;
        match outcome {
            StepOutcome::Continue { modified: Some(value) } => ctx = value,
            StepOutcome::Continue { modified: None } => {}
            StepOutcome::Fail { error } => return Err(error),
        }
    }
    Ok(ctx)
}

/// Sequential guardrail evaluation, per §4.5. A `GuardrailRef::Prompt` is
/// evaluated via a nested structured-output LLM call (no further guardrails);
/// a `GuardrailRef::Callable` resolves against `registry`. A malformed prompt
/// response becomes a synthetic `FAIL`, matching the "wrong result type"
/// clause.
pub async fn execute_guardrails(
    handle: &ExecutionHandle,
    group_name: &str,
    guardrails: &[GuardrailRef],
    registry: &HookRegistry,
    provider: &Arc<dyn Provider>,
    config: &AgentConfig,
    mut content: String,
) -> Result<String, String> {
    for (index, guardrail) in guardrails.iter().enumerate() {
        match guardrail {
            GuardrailRef::Callable(fn_id) => {
                let step_key = format!("{group_name}.{fn_id}.{index}");
                let Some(hook) = registry.get(fn_id).cloned() else {
                    return Err(format!("unregistered guardrail: {fn_id}"));
                };
                let ctx_snapshot = serde_json::json!({"content": content});
                let outcome: StepOutcome = handle
                    .run(&step_key, move || {
                        let hook = hook.clone();
                        let ctx_snapshot = ctx_snapshot.clone();
                        async move { Ok::<_, polos_contracts::StepExecutionError>(hook.call(ctx_snapshot).await) }
                    })
                    .await
                    .map_err(|e| e.to_string())?;
                match outcome {
                    StepOutcome::Continue { modified: Some(value) } => {
                        content = value.get("content").and_then(Value::as_str).unwrap_or(&content).to_string();
                    }
                    StepOutcome::Continue { modified: None } => {}
                    StepOutcome::Fail { error } => return Err(error),
                }
            }
            GuardrailRef::Prompt(prompt) => {
                let step_key = format!("{group_name}.prompt_guardrail.{index}");
                let fn_id = format!("prompt_guardrail_{index}");
                let provider = provider.clone();
                let model = config.model.clone();
                let prompt = prompt.clone();
                let content_clone = content.clone();
                let verdict: Value = handle
                    .run(&step_key, move || {
                        let provider = provider.clone();
                        let model = model.clone();
                        let prompt = prompt.clone();
                        let content_clone = content_clone.clone();
                        let fn_id = fn_id.clone();
                        async move {
                            let messages = vec![
                                HistoryEntry::System { content: prompt },
                                HistoryEntry::User { content: content_clone },
                            ];
                            let mut req = GenerateRequest::new(messages, model);
                            req.output_schema = Some(serde_json::json!({
                                "type": "object",
                                "required": ["passed"],
                                "properties": {"passed": {"type": "boolean"}, "reason": {"type": "string"}},
                            }));
                            req.output_schema_name = Some(fn_id);
                            let response = provider
                                .generate(req)
                                .await
                                .map_err(|e| polos_contracts::StepExecutionError::new(e.to_string()))?;
                            serde_json::from_str::<Value>(&response.content)
                                .map_err(|e| polos_contracts::StepExecutionError::new(format!("guardrail response was not valid JSON: {e}")))
                        }
                    })
                    .await
                    .map_err(|e| e.to_string())?;
                let passed = verdict.get("passed").and_then(Value::as_bool);
                match passed {
                    Some(true) => {}
                    Some(false) => {
                        let reason = verdict.get("reason").and_then(Value::as_str).unwrap_or("guardrail rejected the response");
                        return Err(reason.to_string());
                    }
                    None => return Err("invalid result type: guardrail response missing boolean 'passed'".into()),
                }
            }
        }
    }
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use polos_client::testing::InMemoryOrchestrator;
    use polos_contracts::{ExecutionContext, ExecutionLineage};
    use std::time::Duration;

    fn handle() -> ExecutionHandle {
        let client = Arc::new(InMemoryOrchestrator::new());
        let context = ExecutionContext {
            workflow_id: "agent".into(),
            execution_id: "exec-1".into(),
            deployment_id: "dep".into(),
            lineage: ExecutionLineage {
                parent_execution_id: None,
                root_workflow_id: "agent".into(),
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

    struct AlwaysContinue;
    #[async_trait]
    impl HookFn for AlwaysContinue {
        fn id(&self) -> &str {
            "always_continue"
        }
        async fn call(&self, _ctx: Value) -> StepOutcome {
            StepOutcome::Continue { modified: None }
        }
    }

    struct AlwaysFail;
    #[async_trait]
    impl HookFn for AlwaysFail {
        fn id(&self) -> &str {
            "always_fail"
        }
        async fn call(&self, _ctx: Value) -> StepOutcome {
            StepOutcome::fail("nope")
        }
    }

    #[tokio::test]
    async fn hook_chain_stops_on_first_failure() {
        let h = handle();
        let registry = HookRegistry::builder()
            .with_hook(Arc::new(AlwaysFail))
            .with_hook(Arc::new(AlwaysContinue))
            .build();
        let names = vec!["always_fail".to_string(), "always_continue".to_string()];
        let result = execute_hooks(&h, "on_agent_step_start", &names, &registry, Value::Null).await;
        assert_eq!(result.unwrap_err(), "nope");
    }

    #[tokio::test]
    async fn hook_chain_passes_through_on_success() {
        let h = handle();
        let registry = HookRegistry::builder().with_hook(Arc::new(AlwaysContinue)).build();
        let names = vec!["always_continue".to_string()];
        let result = execute_hooks(&h, "on_agent_step_start", &names, &registry, serde_json::json!({"a": 1})).await;
        assert_eq!(result.unwrap(), serde_json::json!({"a": 1}));
    }
}
