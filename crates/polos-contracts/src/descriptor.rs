//! Workflow/agent/tool descriptors — the process-wide registry's value type.
//!
//! Grounded in `durable::workflow::definition` (a `Workflow` trait with a `TYPE`
//! constant plus declarative lifecycle hooks) and the original SDK's
//! `polos/core/workflow.py` registry, adapted from a dynamic Python registry into
//! a static struct registered once at startup (see `polos_runtime::registry`).

use serde::{Deserialize, Serialize};

/// What kind of unit a descriptor describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Workflow,
    Agent,
    Tool,
}

/// A cron-like schedule attached to a workflow. Scheduled units always run on
/// a concurrency-1 queue and may not also declare an explicit queue name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub cron: String,
    pub timezone: Option<String>,
}

/// An event-trigger binding: the workflow starts once per batch of matching
/// events on `topic`, or after `batch_timeout_ms` elapses with a partial batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventTrigger {
    pub topic: String,
    pub batch_size: u32,
    pub batch_timeout_ms: u64,
}

/// Lifecycle hook identifiers. The actual callables live in the process-local
/// registry (`polos_runtime::registry::HandlerRegistry`); descriptors only carry
/// the names so they can be serialized for registration with the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifecycleHooks {
    pub on_start: Vec<String>,
    pub on_end: Vec<String>,
}

/// A registered workflow/agent/tool unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDescriptor {
    pub id: String,
    pub kind: UnitKind,
    pub payload_schema_name: Option<String>,
    pub state_schema_name: Option<String>,
    pub result_schema_name: Option<String>,
    pub queue_name: Option<String>,
    pub queue_concurrency_limit: Option<u32>,
    pub event_trigger: Option<EventTrigger>,
    pub schedule: Option<ScheduleSpec>,
    pub hooks: LifecycleHooks,
}

impl WorkflowDescriptor {
    pub fn new(id: impl Into<String>, kind: UnitKind) -> Self {
        Self {
            id: id.into(),
            kind,
            payload_schema_name: None,
            state_schema_name: None,
            result_schema_name: None,
            queue_name: None,
            queue_concurrency_limit: None,
            event_trigger: None,
            schedule: None,
            hooks: LifecycleHooks::default(),
        }
    }

    /// Validates the invariants from the data model: scheduled units may not
    /// carry an explicit queue, and event-triggered units may not also be
    /// scheduled.
    pub fn validate(&self) -> Result<(), String> {
        if self.schedule.is_some() && self.queue_name.is_some() {
            return Err(format!(
                "workflow '{}' is scheduled and may not declare an explicit queue",
                self.id
            ));
        }
        if self.schedule.is_some() && self.event_trigger.is_some() {
            return Err(format!(
                "workflow '{}' may not be both scheduled and event-triggered",
                self.id
            ));
        }
        Ok(())
    }
}

/// Ordered stop condition reference: a name the agent loop resolves against
/// its built-in table (`max_steps`, `max_tokens`, `executed_tool`, `has_text`)
/// or a user-registered durable callable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopConditionRef {
    pub name: String,
    pub params: serde_json::Value,
}

/// Ordered guardrail reference: either a built-in string guardrail (evaluated
/// via a nested structured-output LLM call) or a user-registered callable id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GuardrailRef {
    Prompt(String),
    Callable(String),
}

/// Extends `WorkflowDescriptor` with the agent-specific fields. `kind` is
/// always `UnitKind::Agent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub base: WorkflowDescriptor,
    pub provider: String,
    pub model: String,
    pub system_prompt: Option<String>,
    pub tools: Vec<String>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub stop_conditions: Vec<StopConditionRef>,
    pub guardrails: Vec<GuardrailRef>,
    pub guardrail_max_retries: u32,
    pub structured_output_schema_name: Option<String>,
    pub conversation_history_window: Option<u32>,
    pub step_hooks: LifecycleHooks,
    pub tool_hooks: LifecycleHooks,
    /// Whether the caller asked for token-level streaming. Honored only when
    /// no guardrails are declared; with guardrails present the loop still
    /// calls `generate` and emits one synthetic `text_delta` carrying the
    /// full response (§4.4 step 3).
    pub streaming: bool,
}

impl AgentDescriptor {
    pub fn new(id: impl Into<String>, provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base: WorkflowDescriptor::new(id, UnitKind::Agent),
            provider: provider.into(),
            model: model.into(),
            system_prompt: None,
            tools: Vec::new(),
            temperature: None,
            max_output_tokens: None,
            stop_conditions: Vec::new(),
            guardrails: Vec::new(),
            guardrail_max_retries: 2,
            structured_output_schema_name: None,
            conversation_history_window: None,
            step_hooks: LifecycleHooks::default(),
            tool_hooks: LifecycleHooks::default(),
            streaming: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.base.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduled_workflow_rejects_explicit_queue() {
        let mut wf = WorkflowDescriptor::new("nightly", UnitKind::Workflow);
        wf.schedule = Some(ScheduleSpec {
            cron: "0 0 * * *".into(),
            timezone: None,
        });
        wf.queue_name = Some("custom".into());
        assert!(wf.validate().is_err());
    }

    #[test]
    fn scheduled_and_event_triggered_is_rejected() {
        let mut wf = WorkflowDescriptor::new("nightly", UnitKind::Workflow);
        wf.schedule = Some(ScheduleSpec {
            cron: "0 0 * * *".into(),
            timezone: None,
        });
        wf.event_trigger = Some(EventTrigger {
            topic: "orders".into(),
            batch_size: 1,
            batch_timeout_ms: 1000,
        });
        assert!(wf.validate().is_err());
    }

    #[test]
    fn plain_workflow_validates() {
        let wf = WorkflowDescriptor::new("simple", UnitKind::Workflow);
        assert!(wf.validate().is_ok());
    }
}
