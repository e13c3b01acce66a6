//! OpenAI chat-completions adapter, grounded in
//! `everruns_core::openai::OpenAIProtocolLlmProvider`: a `reqwest::Client`
//! plus a fixed base URL, request/response structs mirroring the wire
//! format, and `eventsource-stream` for SSE token streaming.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde_json::{json, Value};

use crate::error::ProviderError;
use crate::provider::{EventStream, Provider};
use crate::types::{
    FunctionCall, GenerateRequest, GenerateResponse, HistoryEntry, StreamEvent, ToolCallRequest,
    ToolDefinition, Usage,
};

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    api_url: String,
}

impl OpenAiProvider {
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

    fn convert_message(entry: &HistoryEntry) -> Value {
        match entry {
            HistoryEntry::System { content } => json!({"role": "system", "content": content}),
            HistoryEntry::User { content } => json!({"role": "user", "content": content}),
            HistoryEntry::Assistant { content } => json!({"role": "assistant", "content": content}),
            HistoryEntry::FunctionCall { call_id, name, arguments, .. } => json!({
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": call_id,
                    "type": "function",
                    "function": {"name": name, "arguments": arguments},
                }],
            }),
            HistoryEntry::FunctionCallOutput { call_id, output } => json!({
                "role": "tool",
                "tool_call_id": call_id,
                "content": output,
            }),
        }
    }

    fn convert_tool(tool: &ToolDefinition) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.parameters,
            },
        })
    }

    fn build_body(&self, req: &GenerateRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": req.model,
            "messages": req.messages.iter().map(Self::convert_message).collect::<Vec<_>>(),
            "stream": stream,
        });
        let obj = body.as_object_mut().expect("object literal");
        if !req.tools.is_empty() {
            obj.insert(
                "tools".into(),
                json!(req.tools.iter().map(Self::convert_tool).collect::<Vec<_>>()),
            );
        }
        if let Some(t) = req.temperature {
            obj.insert("temperature".into(), json!(t));
        }
        if let Some(m) = req.max_tokens {
            obj.insert("max_tokens".into(), json!(m));
        }
        if let Some(p) = req.top_p {
            obj.insert("top_p".into(), json!(p));
        }
        if let Some(schema) = &req.output_schema {
            obj.insert(
                "response_format".into(),
                json!({
                    "type": "json_schema",
                    "json_schema": {
                        "name": req.output_schema_name.clone().unwrap_or_else(|| "output".into()),
                        "schema": schema,
                        "strict": true,
                    },
                }),
            );
        }
        if let Some(extra) = req.provider_kwargs.as_object() {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }
        body
    }

    fn parse_response(model: &str, body: &Value) -> Result<GenerateResponse, ProviderError> {
        let choice = body
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| ProviderError::Malformed("missing choices[0]".into()))?;
        let message = choice.get("message").unwrap_or(&Value::Null);
        let content = message.get("content").and_then(Value::as_str).unwrap_or("").to_string();
        let stop_reason = choice.get("finish_reason").and_then(Value::as_str).unwrap_or("stop").to_string();
        let tool_calls = message
            .get("tool_calls")
            .and_then(Value::as_array)
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|c| {
                        let id = c.get("id")?.as_str()?.to_string();
                        let function = c.get("function")?;
                        Some(ToolCallRequest {
                            call_id: id.clone(),
                            id: Some(id),
                            function: FunctionCall {
                                name: function.get("name")?.as_str()?.to_string(),
                                arguments: function.get("arguments")?.as_str().unwrap_or("{}").to_string(),
                            },
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        let usage = body.get("usage").map(parse_usage).unwrap_or_default();
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

fn parse_usage(usage: &Value) -> Usage {
    Usage {
        input_tokens: usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
        output_tokens: usage.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
        total_tokens: usage.get("total_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, req: GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let model = req.model.clone();
        let body = self.build_body(&req, false);
        let resp = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
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

    async fn stream(&self, req: GenerateRequest) -> Result<EventStream, ProviderError> {
        let model = req.model.clone();
        let body = self.build_body(&req, true);
        let resp = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api(text));
        }

        let byte_stream = resp.bytes_stream();
        let events = byte_stream.eventsource().filter_map(move |frame| {
            let model = model.clone();
            async move {
                let frame = match frame {
                    Ok(f) => f,
                    Err(e) => return Some(Err(ProviderError::Malformed(e.to_string()))),
                };
                if frame.data == "[DONE]" {
                    return None;
                }
                let chunk: Value = match serde_json::from_str(&frame.data) {
                    Ok(v) => v,
                    Err(e) => return Some(Err(ProviderError::Malformed(e.to_string()))),
                };
                let delta = chunk
                    .get("choices")
                    .and_then(|c| c.get(0))
                    .and_then(|c| c.get("delta"))
                    .and_then(|d| d.get("content"))
                    .and_then(Value::as_str);
                let finish = chunk
                    .get("choices")
                    .and_then(|c| c.get(0))
                    .and_then(|c| c.get("finish_reason"))
                    .and_then(Value::as_str);
                if let Some(text) = delta {
                    if !text.is_empty() {
                        return Some(Ok(StreamEvent::TextDelta(text.to_string())));
                    }
                }
                if finish.is_some() {
                    let stop_reason = finish.unwrap_or("stop").to_string();
                    return Some(Ok(StreamEvent::Done(GenerateResponse {
                        content: String::new(),
                        usage: Usage::default(),
                        tool_calls: Vec::new(),
                        raw_output: chunk,
                        model,
                        stop_reason,
                    })));
                }
                None
            }
        });
        Ok(Box::pin(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_message_has_no_content() {
        let entry = HistoryEntry::FunctionCall {
            call_id: "call_1".into(),
            id: Some("call_1".into()),
            name: "lookup".into(),
            arguments: "{}".into(),
        };
        let msg = OpenAiProvider::convert_message(&entry);
        assert!(msg["content"].is_null());
        assert_eq!(msg["tool_calls"][0]["function"]["name"], "lookup");
    }

    #[test]
    fn usage_parses_from_wire_shape() {
        let usage = parse_usage(&json!({"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}));
        assert_eq!(usage.total_tokens, 15);
    }
}
