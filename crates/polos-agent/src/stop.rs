//! Stop conditions (§4.4 step 6): ordered, durable checks evaluated
//! sequentially inside `run` steps. Built-ins are `max_steps`, `max_tokens`,
//! `executed_tool`, and `has_text`; a default safety cap of 10 steps applies
//! unless an explicit `max_steps` condition is configured.

use std::collections::HashMap;
use std::sync::Arc;

use polos_contracts::StopConditionRef;
use polos_providers::Usage;
use polos_runtime::{ExecutionHandle, WorkflowError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_MAX_STEPS: u32 = 10;

/// Everything a stop condition needs to see about the run so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopContext {
    pub step_n: u32,
    pub last_content: String,
    pub executed_tool_names: Vec<String>,
    pub cumulative_usage: Usage,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StopDecision {
    pub stop: bool,
}

impl StopDecision {
    pub const CONTINUE: StopDecision = StopDecision { stop: false };
    pub const STOP: StopDecision = StopDecision { stop: true };
}

pub trait StopCondition: Send + Sync {
    fn name(&self) -> &str;
    fn evaluate(&self, ctx: &StopContext, params: &Value) -> StopDecision;
}

struct MaxSteps;
impl StopCondition for MaxSteps {
    fn name(&self) -> &str {
        "max_steps"
    }
    fn evaluate(&self, ctx: &StopContext, params: &Value) -> StopDecision {
        let limit = params.get("limit").and_then(Value::as_u64).unwrap_or(DEFAULT_MAX_STEPS as u64) as u32;
        StopDecision { stop: ctx.step_n >= limit }
    }
}

struct MaxTokens;
impl StopCondition for MaxTokens {
    fn name(&self) -> &str {
        "max_tokens"
    }
    fn evaluate(&self, ctx: &StopContext, params: &Value) -> StopDecision {
        let Some(limit) = params.get("limit").and_then(Value::as_u64) else {
            return StopDecision::CONTINUE;
        };
        StopDecision { stop: ctx.cumulative_usage.total_tokens as u64 >= limit }
    }
}

struct ExecutedTool;
impl StopCondition for ExecutedTool {
    fn name(&self) -> &str {
        "executed_tool"
    }
    fn evaluate(&self, ctx: &StopContext, params: &Value) -> StopDecision {
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return StopDecision::CONTINUE;
        };
        StopDecision { stop: ctx.executed_tool_names.iter().any(|t| t == name) }
    }
}

struct HasText;
impl StopCondition for HasText {
    fn name(&self) -> &str {
        "has_text"
    }
    fn evaluate(&self, ctx: &StopContext, _params: &Value) -> StopDecision {
        StopDecision { stop: !ctx.last_content.trim().is_empty() }
    }
}

#[derive(Clone)]
pub struct StopRegistry {
    conditions: Arc<HashMap<String, Arc<dyn StopCondition>>>,
}

impl Default for StopRegistry {
    fn default() -> Self {
        let builtins: Vec<Arc<dyn StopCondition>> =
            vec![Arc::new(MaxSteps), Arc::new(MaxTokens), Arc::new(ExecutedTool), Arc::new(HasText)];
        let conditions = builtins.into_iter().map(|c| (c.name().to_string(), c)).collect();
        Self { conditions: Arc::new(conditions) }
    }
}

impl StopRegistry {
    pub fn with_custom(mut self, condition: Arc<dyn StopCondition>) -> Self {
        Arc::make_mut(&mut self.conditions).insert(condition.name().to_string(), condition);
        self
    }

    fn get(&self, name: &str) -> Option<&Arc<dyn StopCondition>> {
        self.conditions.get(name)
    }

    pub fn has_explicit_max_steps(conditions: &[StopConditionRef]) -> bool {
        conditions.iter().any(|c| c.name == "max_steps")
    }
}

/// Evaluates every configured stop condition in order, each as its own
/// durable `run` step keyed `apply_stop:step_{n}.{name}.{index}`, returning
/// on the first `stop: true`. `default_max_steps` (the deployment's
/// configured `POLOS_AGENT_MAX_STEPS`) is injected as an implicit trailing
/// `max_steps` condition unless the caller already declared one explicitly.
pub async fn apply_stop(
    handle: &ExecutionHandle,
    step_n: u32,
    conditions: &[StopConditionRef],
    registry: &StopRegistry,
    ctx: &StopContext,
    default_max_steps: u32,
) -> Result<bool, WorkflowError> {
    for (index, condition_ref) in conditions.iter().enumerate() {
        if evaluate_one(handle, step_n, index, condition_ref, registry, ctx).await? {
            return Ok(true);
        }
    }
    if !StopRegistry::has_explicit_max_steps(conditions) {
        let implicit = StopConditionRef { name: "max_steps".into(), params: serde_json::json!({"limit": default_max_steps}) };
        if evaluate_one(handle, step_n, conditions.len(), &implicit, registry, ctx).await? {
            return Ok(true);
        }
    }
    Ok(false)
}

async fn evaluate_one(
    handle: &ExecutionHandle,
    step_n: u32,
    index: usize,
    condition_ref: &StopConditionRef,
    registry: &StopRegistry,
    ctx: &StopContext,
) -> Result<bool, WorkflowError> {
    let Some(condition) = registry.get(&condition_ref.name).cloned() else {
        return Err(WorkflowError::Validation(format!("unregistered stop condition: {}", condition_ref.name)));
    };
    let step_key = format!("apply_stop:step_{step_n}.{}.{index}", condition_ref.name);
    let params = condition_ref.params.clone();
    let ctx = ctx.clone();
    let decision: StopDecision = handle
        .run(&step_key, move || {
            let condition = condition.clone();
            let params = params.clone();
            let ctx = ctx.clone();
            async move { Ok::<_, polos_contracts::StepExecutionError>(condition.evaluate(&ctx, &params)) }
        })
        .await?;
    Ok(decision.stop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use polos_client::testing::InMemoryOrchestrator;
    use polos_contracts::{ExecutionContext, ExecutionLineage};
    use std::sync::Arc as StdArc;
    use std::time::Duration;

    fn handle() -> ExecutionHandle {
        let client = StdArc::new(InMemoryOrchestrator::new());
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

    fn ctx(step_n: u32) -> StopContext {
        StopContext { step_n, last_content: String::new(), executed_tool_names: vec![], cumulative_usage: Usage::default() }
    }

    #[tokio::test]
    async fn implicit_default_cap_stops_at_the_configured_limit() {
        let h = handle();
        let registry = StopRegistry::default();
        let stopped = apply_stop(&h, DEFAULT_MAX_STEPS, &[], &registry, &ctx(DEFAULT_MAX_STEPS), DEFAULT_MAX_STEPS).await.unwrap();
        assert!(stopped);
    }

    #[tokio::test]
    async fn implicit_cap_honors_a_configured_value_other_than_the_default() {
        let h = handle();
        let registry = StopRegistry::default();
        let not_yet = apply_stop(&h, 3, &[], &registry, &ctx(3), 5).await.unwrap();
        assert!(!not_yet);
        let stopped = apply_stop(&h, 5, &[], &registry, &ctx(5), 5).await.unwrap();
        assert!(stopped);
    }

    #[tokio::test]
    async fn explicit_max_steps_overrides_the_default() {
        let h = handle();
        let registry = StopRegistry::default();
        let conditions = vec![StopConditionRef { name: "max_steps".into(), params: serde_json::json!({"limit": 3}) }];
        let stopped = apply_stop(&h, 3, &conditions, &registry, &ctx(3), DEFAULT_MAX_STEPS).await.unwrap();
        assert!(stopped);
        let not_yet = apply_stop(&h, 2, &conditions, &registry, &ctx(2), DEFAULT_MAX_STEPS).await.unwrap();
        assert!(!not_yet);
    }

    #[tokio::test]
    async fn has_text_stops_once_content_is_nonempty() {
        let h = handle();
        let registry = StopRegistry::default();
        let conditions = vec![StopConditionRef { name: "has_text".into(), params: Value::Null }];
        let mut c = ctx(1);
        c.last_content = "done".into();
        let stopped = apply_stop(&h, 1, &conditions, &registry, &c, DEFAULT_MAX_STEPS).await.unwrap();
        assert!(stopped);
    }
}
