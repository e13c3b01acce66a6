//! Agent-loop data shapes: input acceptance, per-iteration trace entries, and
//! the final result, per §4.4.

use polos_providers::{HistoryEntry, ToolCallRequest, Usage};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AgentError;

/// The caller's input, accepted as either a single string user message or a
/// pre-formed message array (§4.4 step 1).
pub enum AgentInput {
    Text(String),
    Messages(Vec<HistoryEntry>),
}

impl AgentInput {
    pub fn from_payload(payload: &Value) -> Result<Self, AgentError> {
        match payload {
            Value::String(s) => Ok(AgentInput::Text(s.clone())),
            Value::Array(_) => {
                let messages: Vec<HistoryEntry> = serde_json::from_value(payload.clone())
                    .map_err(|e| AgentError::StructuredOutputInvalid(format!("malformed message array: {e}")))?;
                Ok(AgentInput::Messages(messages))
            }
            Value::Object(obj) if obj.contains_key("input") => {
                Self::from_payload(&obj["input"])
            }
            Value::Object(obj) if obj.contains_key("messages") => {
                Self::from_payload(&obj["messages"])
            }
            other => Err(AgentError::StructuredOutputInvalid(format!(
                "agent payload must be a string or message array, got {other}"
            ))),
        }
    }

    pub fn into_entries(self) -> Vec<HistoryEntry> {
        match self {
            AgentInput::Text(content) => vec![HistoryEntry::User { content }],
            AgentInput::Messages(entries) => entries,
        }
    }
}

/// One executed tool call's recorded outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub output: Value,
    pub result_schema_name: Option<String>,
}

/// One loop iteration, appended to the trace (§4.4 step 5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStep {
    pub n: u32,
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub tool_results: Vec<ToolResult>,
    pub usage: Usage,
    pub raw_output: Value,
}

/// The agent's final, durable-result shape (§4.4 step 8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent_run_id: String,
    pub conversation_id: String,
    pub result: Value,
    pub result_schema_name: Option<String>,
    pub steps: Vec<AgentStep>,
    pub tool_results: Vec<ToolResult>,
    pub total_steps: u32,
    pub usage: Usage,
}
