//! The agent loop state machine, guardrail/hook executors, stop conditions,
//! session memory, and tool registry (C5/C6).

pub mod channel;
pub mod config;
pub mod error;
pub mod hooks;
#[path = "loop_.rs"]
pub mod agent_loop;
pub mod memory;
pub mod stop;
pub mod tools;
pub mod types;

pub use agent_loop::agent_unit;
pub use channel::{Channel, ChannelError, ChannelRegistry, ChannelRegistryBuilder, InMemoryChannel};
pub use config::AgentConfig;
pub use error::AgentError;
pub use hooks::{execute_guardrails, execute_hooks, HookFn, HookRegistry, HookRegistryBuilder, StepOutcome};
pub use memory::CompactionConfig;
pub use stop::{apply_stop, StopCondition, StopContext, StopDecision, StopRegistry, DEFAULT_MAX_STEPS};
pub use tools::{AskUserTool, ToolHandler, ToolRegistry, ToolRegistryBuilder, WebSearchTool};
pub use types::{AgentInput, AgentResult, AgentStep, ToolResult};
