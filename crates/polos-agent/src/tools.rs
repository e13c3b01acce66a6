//! Tool registry and the two provider-agnostic built-ins (§14 supplement,
//! grounded in `polos/tools/ask_user.py`/`web_search.py`): `ask_user` pauses
//! the execution for out-of-band input via `step.suspend`; `web_search` is a
//! descriptor-only stub with no concrete search backend (out of scope, §1).
//!
//! Each tool is also a `Unit` of kind `Tool` (§4.3): the agent loop never
//! calls `ToolHandler::invoke` directly, it submits the call through
//! `step.batch_invoke_and_wait` like any other sub-execution, and the worker
//! that picks it up dispatches it through the same `UnitRegistry` as
//! workflows and agents. `into_units` is how a `ToolRegistry` gets folded
//! into that registry at startup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use polos_contracts::{UnitKind, WorkflowDescriptor};
use polos_providers::ToolDefinition;
use polos_runtime::workflow::Unit;
use polos_runtime::{ExecutionHandle, WorkflowError};
use serde_json::Value;

#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn descriptor(&self) -> &ToolDefinition;
    async fn invoke(&self, handle: &ExecutionHandle, arguments: Value) -> Result<Value, WorkflowError>;
}

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Arc<HashMap<String, Arc<dyn ToolHandler>>>,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolHandler>> {
        self.tools.get(name)
    }

    /// Wraps every registered tool as a `Unit` so it can be folded into the
    /// process-wide `UnitRegistry` alongside workflows and agents.
    pub fn into_units(&self) -> Vec<Unit> {
        self.tools
            .values()
            .map(|handler| {
                let handler = handler.clone();
                Unit {
                    descriptor: WorkflowDescriptor::new(handler.descriptor().name.clone(), UnitKind::Tool),
                    handler: Arc::new(move |handle, payload| {
                        let handler = handler.clone();
                        Box::pin(async move { handler.invoke(&handle, payload).await })
                    }),
                }
            })
            .collect()
    }
}

#[derive(Default)]
pub struct ToolRegistryBuilder {
    tools: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistryBuilder {
    pub fn with_tool(mut self, handler: Arc<dyn ToolHandler>) -> Self {
        self.tools.insert(handler.descriptor().name.clone(), handler);
        self
    }

    /// Registers the two built-in tools alongside any caller-supplied ones.
    pub fn with_builtins(self) -> Self {
        self.with_tool(Arc::new(AskUserTool::new())).with_tool(Arc::new(WebSearchTool::new()))
    }

    pub fn build(self) -> ToolRegistry {
        ToolRegistry { tools: Arc::new(self.tools) }
    }
}

pub struct AskUserTool {
    descriptor: ToolDefinition,
}

impl AskUserTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDefinition {
                name: "ask_user".into(),
                description: "Pause the run and ask the user a question out-of-band.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "required": ["question"],
                    "properties": {"question": {"type": "string"}},
                }),
            },
        }
    }
}

impl Default for AskUserTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolHandler for AskUserTool {
    fn descriptor(&self) -> &ToolDefinition {
        &self.descriptor
    }

    async fn invoke(&self, handle: &ExecutionHandle, arguments: Value) -> Result<Value, WorkflowError> {
        handle.suspend("ask_user", arguments, None).await
    }
}

pub struct WebSearchTool {
    descriptor: ToolDefinition,
}

impl WebSearchTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDefinition {
                name: "web_search".into(),
                description: "Search the web for current information.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "required": ["query"],
                    "properties": {"query": {"type": "string"}},
                }),
            },
        }
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolHandler for WebSearchTool {
    fn descriptor(&self) -> &ToolDefinition {
        &self.descriptor
    }

    async fn invoke(&self, _handle: &ExecutionHandle, _arguments: Value) -> Result<Value, WorkflowError> {
        Err(WorkflowError::Validation(
            "web_search has no concrete search backend configured".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_register_under_their_own_names() {
        let registry = ToolRegistry::builder().with_builtins().build();
        assert!(registry.get("ask_user").is_some());
        assert!(registry.get("web_search").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn into_units_carries_the_tool_kind() {
        let registry = ToolRegistry::builder().with_builtins().build();
        let units = registry.into_units();
        assert_eq!(units.len(), 2);
        assert!(units.iter().all(|u| u.descriptor.kind == UnitKind::Tool));
    }
}
