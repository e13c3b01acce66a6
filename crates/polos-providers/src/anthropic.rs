//! Anthropic messages-API adapter. Grounded in the same
//! `reqwest`+request-struct shape as `openai.rs` (both descend from
//! `everruns_core`'s provider pattern), diverging where Anthropic's wire
//! format actually differs: a top-level `system` field instead of a system
//! message, `tool_use`/`tool_result` content blocks instead of OpenAI's
//! `tool_calls`/`tool` role, and an `x-api-key`/`anthropic-version` header
//! pair instead of bearer auth.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::ProviderError;
use crate::provider::{EventStream, Provider};
use crate::types::{
    FunctionCall, GenerateRequest, GenerateResponse, HistoryEntry, ToolCallRequest, ToolDefinition,
    Usage,
};

const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug)]
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    api_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            api_url: DEFAULT_API_URL.to_string(),
        }
    }

    pub fn with_base_url(api_key: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            api_url: api_url.into(),
        }
    }

    fn split_system(messages: &[HistoryEntry]) -> (Option<String>, Vec<Value>) {
        let mut system = None;
        let mut turns = Vec::new();
        for entry in messages {
            match entry {
                HistoryEntry::System { content } => {
                    system = Some(match system.take() {
                        Some(existing) => format!("{existing}\n{content}"),
                        None => content.clone(),
                    });
                }
                HistoryEntry::User { content } => {
                    turns.push(json!({"role": "user", "content": content}));
                }
                HistoryEntry::Assistant { content } => {
                    turns.push(json!({"role": "assistant", "content": content}));
                }
                HistoryEntry::FunctionCall { call_id, name, arguments, .. } => {
                    let input: Value = serde_json::from_str(arguments).unwrap_or(Value::Object(Default::default()));
                    turns.push(json!({
                        "role": "assistant",
                        "content": [{"type": "tool_use", "id": call_id, "name": name, "input": input}],
                    }));
                }
                HistoryEntry::FunctionCallOutput { call_id, output } => {
                    turns.push(json!({
                        "role": "user",
                        "content": [{"type": "tool_result", "tool_use_id": call_id, "content": output}],
                    }));
                }
            }
        }
        (system, turns)
    }

    fn convert_tool(tool: &ToolDefinition) -> Value {
        json!({
            "name": tool.name,
            "description": tool.description,
            "input_schema": tool.parameters,
        })
    }

    fn build_body(&self, req: &GenerateRequest, stream: bool) -> Value {
        let (system, messages) = Self::split_system(&req.messages);
        let mut body = json!({
            "model": req.model,
            "messages": messages,
            "max_tokens": req.max_tokens.unwrap_or(4096),
            "stream": stream,
        });
        let obj = body.as_object_mut().expect("object literal");
        if let Some(system) = system {
            obj.insert("system".into(), json!(system));
        }
        if !req.tools.is_empty() {
            obj.insert(
                "tools".into(),
                json!(req.tools.iter().map(Self::convert_tool).collect::<Vec<_>>()),
            );
        }
        if let Some(t) = req.temperature {
            obj.insert("temperature".into(), json!(t));
        }
        if let Some(p) = req.top_p {
            obj.insert("top_p".into(), json!(p));
        }
        body
    }

    fn parse_response(model: &str, body: &Value) -> Result<GenerateResponse, ProviderError> {
        let blocks = body
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::Malformed("missing content blocks".into()))?;
        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for block in blocks {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(Value::as_str) {
                        content.push_str(text);
                    }
                }
                Some("tool_use") => {
                    let id = block.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
                    let name = block.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                    let arguments = block.get("input").cloned().unwrap_or(Value::Null).to_string();
                    tool_calls.push(ToolCallRequest {
                        call_id: id.clone(),
                        id: Some(id),
                        function: FunctionCall { name, arguments },
                    });
                }
                _ => {}
            }
        }
        let stop_reason = body.get("stop_reason").and_then(Value::as_str).unwrap_or("end_turn").to_string();
        let usage = body
            .get("usage")
            .map(|u| Usage {
                input_tokens: u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
                output_tokens: u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
                total_tokens: (u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0)
                    + u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0)) as u32,
            })
            .unwrap_or_default();
        Ok(GenerateResponse {
            content,
            usage,
            tool_calls,
            raw_output: body.clone(),
            model: model.to_string(),
            stop_reason,
        })
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn generate(&self, req: GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let model = req.model.clone();
        let body = self.build_body(&req, false);
        let resp = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api(text));
        }
        let parsed: Value = resp.json().await?;
        Self::parse_response(&model, &parsed)
    }

    // Streaming left to the default `generate`-then-`Done` adapter: Anthropic's
    // `content_block_delta` event stream needs incremental JSON-block assembly
    // this crate does not yet implement; the agent loop degrades gracefully to
    // one `Done` event per §4.6 ("emit a single text_delta... if streaming
    // isn't available").
    async fn stream(&self, req: GenerateRequest) -> Result<EventStream, ProviderError> {
        let response = self.generate(req).await?;
        let events = vec![
            Ok(crate::types::StreamEvent::TextDelta(response.content.clone())),
            Ok(crate::types::StreamEvent::Done(response)),
        ];
        Ok(Box::pin(futures::stream::iter(events)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_are_merged_out_of_the_turn_list() {
        let messages = vec![
            HistoryEntry::System { content: "be terse".into() },
            HistoryEntry::User { content: "hi".into() },
        ];
        let (system, turns) = AnthropicProvider::split_system(&messages);
        assert_eq!(system.as_deref(), Some("be terse"));
        assert_eq!(turns.len(), 1);
    }

    #[test]
    fn tool_result_entry_becomes_a_user_turn() {
        let messages = vec![HistoryEntry::FunctionCallOutput {
            call_id: "call_1".into(),
            output: "42".into(),
        }];
        let (_, turns) = AnthropicProvider::split_system(&messages);
        assert_eq!(turns[0]["role"], "user");
        assert_eq!(turns[0]["content"][0]["type"], "tool_result");
    }
}
