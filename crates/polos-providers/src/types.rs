//! Canonical, provider-agnostic request/response shapes (§4.6).
//!
//! Grounded in `everruns_core::llm`'s `LlmMessage`/`LlmCallConfig`/`LlmResponse`
//! triad, reshaped around this spec's canonical tagged tool-call history
//! (`function_call`/`function_call_output`) instead of the teacher's
//! role-tagged `ConversationMessage` history.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry in the canonical conversation history. Unlike the teacher's
/// `LlmMessage` (a single role/content/tool_calls struct), tool calls and
/// their outputs are their own entries — this is the shape every provider
/// adapter converts to and from its native wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryEntry {
    System { content: String },
    User { content: String },
    Assistant { content: String },
    FunctionCall {
        call_id: String,
        id: Option<String>,
        name: String,
        arguments: String,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub id: Option<String>,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// A `generate` call's parameters, mirroring §4.6's interface signature.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub messages: Vec<HistoryEntry>,
    pub model: String,
    pub tools: Vec<ToolDefinition>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub output_schema: Option<Value>,
    pub output_schema_name: Option<String>,
    pub provider_kwargs: Value,
}

impl GenerateRequest {
    pub fn new(messages: Vec<HistoryEntry>, model: impl Into<String>) -> Self {
        Self {
            messages,
            model: model.into(),
            tools: Vec::new(),
            temperature: None,
            max_tokens: None,
            top_p: None,
            output_schema: None,
            output_schema_name: None,
            provider_kwargs: Value::Null,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub content: String,
    pub usage: Usage,
    pub tool_calls: Vec<ToolCallRequest>,
    pub raw_output: Value,
    pub model: String,
    pub stop_reason: String,
}

/// A streaming event, per §4.6's `{type, data}` shape.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextDelta(String),
    ToolCall(ToolCallRequest),
    Done(GenerateResponse),
    Error(String),
}
