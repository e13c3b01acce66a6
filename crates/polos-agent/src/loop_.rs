//! The agent loop itself (C5, §4.4): builds the `HandlerFn` a `Unit` of kind
//! `Agent` registers, implementing the `{START_STEP, CALL_LLM, EXECUTE_TOOLS,
//! APPLY_STOP, END}` state machine described there.

use std::sync::Arc;

use polos_contracts::{AgentDescriptor, StepExecutionError};
use polos_providers::{GenerateRequest, GenerateResponse, HistoryEntry, Provider, ProviderRegistry, ToolCallRequest, Usage};
use polos_runtime::workflow::{HandlerFn, Unit};
use polos_runtime::{ExecutionHandle, SchemaRegistry, WorkflowError};
use serde_json::Value;

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::hooks::{execute_guardrails, execute_hooks, HookRegistry};
use crate::memory;
use crate::stop::{apply_stop, StopContext, StopRegistry};
use crate::tools::ToolRegistry;
use crate::types::{AgentInput, AgentResult, AgentStep, ToolResult};

/// Builds the `Unit` a worker registers for one agent descriptor: the
/// descriptor's `base` plus a handler closure running the full loop.
pub fn agent_unit(
    descriptor: AgentDescriptor,
    providers: ProviderRegistry,
    tools: ToolRegistry,
    hooks: HookRegistry,
    schemas: Arc<SchemaRegistry>,
    stops: StopRegistry,
    default_max_steps: u32,
) -> Unit {
    let base = descriptor.base.clone();
    let descriptor = Arc::new(descriptor);
    let handler: HandlerFn = Arc::new(move |handle, payload| {
        let descriptor = descriptor.clone();
        let providers = providers.clone();
        let tools = tools.clone();
        let hooks = hooks.clone();
        let schemas = schemas.clone();
        let stops = stops.clone();
        Box::pin(async move {
            let result =
                run_agent_loop(&handle, &descriptor, payload, &providers, &tools, &hooks, &schemas, &stops, default_max_steps).await?;
            // An `AgentResult` built entirely from JSON-safe fields should
            // never fail to serialize; if it somehow does, report it as a
            // failure rather than silently substituting `Value::Null` for
            // the caller's result.
            serde_json::to_value(result)
                .map_err(|e| WorkflowError::Unserializable(e.to_string()))
        })
    });
    Unit { descriptor: base, handler }
}

async fn run_agent_loop(
    handle: &ExecutionHandle,
    descriptor: &AgentDescriptor,
    payload: Value,
    providers: &ProviderRegistry,
    tools: &ToolRegistry,
    hooks: &HookRegistry,
    schemas: &SchemaRegistry,
    stops: &StopRegistry,
    default_max_steps: u32,
) -> Result<AgentResult, AgentError> {
    let conversation_id = handle.uuid("conversation_id").await?;
    let input = AgentInput::from_payload(&payload)?;
    let input_entries = input.into_entries();

    let provider = providers.get(&descriptor.provider)?;
    let config = AgentConfig::from_descriptor(descriptor, tools, schemas);

    let mut history = Vec::new();
    if let Some(window) = descriptor.conversation_history_window {
        history = memory::load_conversation_history(handle, "session_memory:load", &conversation_id, Some(window)).await?;
        history = memory::compact_if_needed(handle, "session_memory:compact", history, &provider, &config.model, memory::CompactionConfig::default()).await;
    }

    let mut messages = history;
    messages.extend(input_entries.iter().cloned());

    let mut cumulative_usage = Usage::default();
    let mut all_tool_results = Vec::new();
    let mut trace = Vec::new();
    let mut last_content = String::new();
    let mut step_n: u32 = 0;

    loop {
        step_n += 1;

        let step_ctx = serde_json::json!({"step_n": step_n, "messages": messages});
        execute_hooks(handle, &format!("on_agent_step_start:step_{step_n}"), &descriptor.step_hooks.on_start, hooks, step_ctx)
            .await
            .map_err(AgentError::HookFailed)?;

        let response = call_llm(handle, step_n, &provider, &config, descriptor, hooks, &mut messages).await?;
        cumulative_usage.input_tokens += response.usage.input_tokens;
        cumulative_usage.output_tokens += response.usage.output_tokens;
        cumulative_usage.total_tokens += response.usage.total_tokens;
        last_content = response.content.clone();

        if !response.content.is_empty() {
            messages.push(HistoryEntry::Assistant { content: response.content.clone() });
        }

        let (step_tool_results, executed_names) =
            execute_tools(handle, step_n, &response.tool_calls, tools, hooks, descriptor, &mut messages).await?;

        trace.push(AgentStep {
            n: step_n,
            content: response.content.clone(),
            tool_calls: response.tool_calls.clone(),
            tool_results: step_tool_results.clone(),
            usage: response.usage,
            raw_output: response.raw_output.clone(),
        });
        all_tool_results.extend(step_tool_results);

        let stop_ctx = StopContext {
            step_n,
            last_content: last_content.clone(),
            executed_tool_names: executed_names,
            cumulative_usage,
        };
        let should_stop = apply_stop(handle, step_n, &descriptor.stop_conditions, stops, &stop_ctx, default_max_steps).await?;
        if should_stop {
            break;
        }
    }

    let final_result = finalize(handle, descriptor, schemas, &provider, &config, &mut messages, last_content).await?;

    if descriptor.conversation_history_window.is_some() {
        memory::persist_conversation_turn(
            handle,
            "session_memory:persist",
            &conversation_id,
            &input_entries,
            &final_result_content(&final_result),
        )
        .await?;
    }

    let agent_run_id = handle.context().execution_id.clone();
    Ok(AgentResult {
        agent_run_id,
        conversation_id,
        result: final_result,
        result_schema_name: descriptor.structured_output_schema_name.clone(),
        steps: trace,
        tool_results: all_tool_results,
        total_steps: step_n,
        usage: cumulative_usage,
    })
}

fn final_result_content(result: &Value) -> String {
    match result {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `CALL_LLM` (§4.4 step 3): builds the request, picks `stream` vs
/// `generate`, and runs the sequential guardrail retry.
async fn call_llm(
    handle: &ExecutionHandle,
    step_n: u32,
    provider: &Arc<dyn Provider>,
    config: &AgentConfig,
    descriptor: &AgentDescriptor,
    hooks: &HookRegistry,
    messages: &mut Vec<HistoryEntry>,
) -> Result<GenerateResponse, AgentError> {
    let use_stream = descriptor.streaming && descriptor.guardrails.is_empty();

    let mut attempt: u32 = 0;
    loop {
        let response = if use_stream {
            let step_key = format!("call_llm:step_{step_n}.stream.{attempt}");
            call_llm_stream(handle, &step_key, provider, config, messages).await?
        } else {
            let step_key = format!("call_llm:step_{step_n}.generate.{attempt}");
            let response = call_llm_generate(handle, &step_key, provider, config, messages).await?;
            if descriptor.streaming {
                handle
                    .publish_workflow_event(
                        &format!("call_llm:step_{step_n}.synthetic_delta"),
                        serde_json::json!({"content": response.content}),
                        Some("text_delta"),
                    )
                    .await
                    .ok();
            }
            response
        };

        if descriptor.guardrails.is_empty() {
            return Ok(response);
        }

        let group = format!("call_llm:step_{step_n}.guardrails.attempt_{attempt}");
        match execute_guardrails(handle, &group, &descriptor.guardrails, hooks, provider, config, response.content.clone()).await {
            Ok(validated) => {
                let mut response = response;
                response.content = validated;
                return Ok(response);
            }
            Err(reason) => {
                attempt += 1;
                if attempt > config.guardrail_max_retries {
                    return Err(AgentError::GuardrailExhausted(config.guardrail_max_retries, reason));
                }
                messages.push(HistoryEntry::User {
                    content: format!("Your previous response was rejected: {reason}. Please try again."),
                });
            }
        }
    }
}

async fn call_llm_generate(
    handle: &ExecutionHandle,
    step_key: &str,
    provider: &Arc<dyn Provider>,
    config: &AgentConfig,
    messages: &[HistoryEntry],
) -> Result<GenerateResponse, AgentError> {
    let request = build_request(config, messages);
    let provider = provider.clone();
    let response = handle
        .run(step_key, move || {
            let provider = provider.clone();
            let request = request.clone();
            async move { provider.generate(request).await.map_err(|e| StepExecutionError::new(e.to_string())) }
        })
        .await?;
    Ok(response)
}

async fn call_llm_stream(
    handle: &ExecutionHandle,
    step_key: &str,
    provider: &Arc<dyn Provider>,
    config: &AgentConfig,
    messages: &[HistoryEntry],
) -> Result<GenerateResponse, AgentError> {
    use futures::StreamExt;

    let request = build_request(config, messages);
    let provider = provider.clone();
    let response = handle
        .run(step_key, move || {
            let provider = provider.clone();
            let request = request.clone();
            async move {
                let mut stream = provider.stream(request).await.map_err(|e| StepExecutionError::new(e.to_string()))?;
                while let Some(event) = stream.next().await {
                    match event.map_err(|e| StepExecutionError::new(e.to_string()))? {
                        polos_providers::StreamEvent::Done(response) => return Ok(response),
                        polos_providers::StreamEvent::Error(message) => return Err(StepExecutionError::new(message)),
                        polos_providers::StreamEvent::TextDelta(_) | polos_providers::StreamEvent::ToolCall(_) => {}
                    }
                }
                Err(StepExecutionError::new("provider stream ended without a done event"))
            }
        })
        .await?;
    Ok(response)
}

fn build_request(config: &AgentConfig, messages: &[HistoryEntry]) -> GenerateRequest {
    let mut history = Vec::new();
    if let Some(system_prompt) = &config.system_prompt {
        history.push(HistoryEntry::System { content: system_prompt.clone() });
    }
    history.extend(messages.iter().cloned());

    let mut request = GenerateRequest::new(history, config.model.clone());
    request.tools = config.tools.clone();
    request.temperature = config.temperature;
    request.max_tokens = config.max_tokens;
    request.provider_kwargs = config.provider_kwargs.clone();
    if config.tools.is_empty() {
        request.output_schema = config.output_schema.clone();
        request.output_schema_name = config.output_schema_name.clone();
    }
    request
}

/// `EXECUTE_TOOLS` (§4.4 step 4): resolve, hook, fan out as one
/// `batch_invoke_and_wait`, hook again, and append `function_call_output`
/// entries to the running message list.
async fn execute_tools(
    handle: &ExecutionHandle,
    step_n: u32,
    tool_calls: &[ToolCallRequest],
    tools: &ToolRegistry,
    hooks: &HookRegistry,
    descriptor: &AgentDescriptor,
    messages: &mut Vec<HistoryEntry>,
) -> Result<(Vec<ToolResult>, Vec<String>), AgentError> {
    if tool_calls.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }

    let mut requests = Vec::with_capacity(tool_calls.len());
    let mut executed_names = Vec::with_capacity(tool_calls.len());
    for (index, call) in tool_calls.iter().enumerate() {
        if tools.get(&call.function.name).is_none() {
            return Err(AgentError::UnknownTool(call.function.name.clone()));
        }
        let arguments: Value = serde_json::from_str(&call.function.arguments).unwrap_or_else(|_| serde_json::json!({}));

        messages.push(HistoryEntry::FunctionCall {
            call_id: call.call_id.clone(),
            id: call.id.clone(),
            name: call.function.name.clone(),
            arguments: call.function.arguments.clone(),
        });

        let hook_ctx = serde_json::json!({"name": call.function.name, "arguments": arguments});
        execute_hooks(handle, &format!("on_tool_start:step_{step_n}.call_{index}"), &descriptor.tool_hooks.on_start, hooks, hook_ctx)
            .await
            .map_err(AgentError::HookFailed)?;

        requests.push((call.function.name.clone(), arguments, None));
        executed_names.push(call.function.name.clone());
    }

    let step_key = format!("execute_tools:step_{step_n}");
    let outputs: Vec<Value> = handle.batch_invoke_and_wait(&step_key, requests).await?;

    let mut results = Vec::with_capacity(tool_calls.len());
    for (index, (call, output)) in tool_calls.iter().zip(outputs.into_iter()).enumerate() {
        let hook_ctx = serde_json::json!({"name": call.function.name, "output": output});
        execute_hooks(handle, &format!("on_tool_end:step_{step_n}.call_{index}"), &descriptor.tool_hooks.on_end, hooks, hook_ctx)
            .await
            .map_err(AgentError::HookFailed)?;

        messages.push(HistoryEntry::FunctionCallOutput {
            call_id: call.call_id.clone(),
            output: output.to_string(),
        });
        results.push(ToolResult {
            call_id: call.call_id.clone(),
            name: call.function.name.clone(),
            output,
            result_schema_name: None,
        });
    }
    Ok((results, executed_names))
}

/// `END` / structured-output retry (§4.4 step 7): validates the last
/// assistant content against the declared schema, retrying `CALL_LLM`
/// exactly once more on failure.
async fn finalize(
    handle: &ExecutionHandle,
    descriptor: &AgentDescriptor,
    schemas: &SchemaRegistry,
    provider: &Arc<dyn Provider>,
    config: &AgentConfig,
    messages: &mut Vec<HistoryEntry>,
    last_content: String,
) -> Result<Value, AgentError> {
    let Some(schema_name) = &descriptor.structured_output_schema_name else {
        return Ok(Value::String(last_content));
    };

    if let Some(value) = try_parse_structured(&last_content, schema_name, schemas) {
        return Ok(value);
    }

    messages.push(HistoryEntry::User {
        content: format!("Your previous response did not match the required schema {schema_name}. Respond again with valid JSON matching it."),
    });
    let response = call_llm_generate(handle, "end:structured_output_retry", provider, config, messages).await?;
    try_parse_structured(&response.content, schema_name, schemas)
        .ok_or_else(|| AgentError::StructuredOutputInvalid(format!("response still did not match schema {schema_name} after retry")))
}

/// Parses `content` against `schema_name`, falling back to the original's
/// lenient coercion (§14 supplement, `polos/utils/output_schema.py`): a bare
/// string reply against a single-required-property schema is wrapped as
/// `{"<property>": content}` before giving up.
fn try_parse_structured(content: &str, schema_name: &str, schemas: &SchemaRegistry) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(content) {
        if schemas.validate(schema_name, &value).is_ok() {
            return Some(value);
        }
    }
    let schema = schemas.get(schema_name)?;
    let required = schema.get("required")?.as_array()?;
    let [only_field] = required.as_slice() else { return None };
    let field_name = only_field.as_str()?;
    let coerced = serde_json::json!({field_name: content});
    schemas.validate(schema_name, &coerced).ok()?;
    Some(coerced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use polos_client::testing::InMemoryOrchestrator;
    use polos_client::OrchestratorClient;
    use polos_contracts::step::StepRecord;
    use polos_contracts::{ExecutionContext, ExecutionLineage, StopConditionRef};
    use polos_providers::registry::ProviderSpec;
    use polos_providers::ToolDefinition;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use crate::tools::ToolHandler;

    /// Registered only so `execute_tools`'s existence check passes; its
    /// actual result comes from the seeded `execute_tools:step_1` record, the
    /// same way a real tool call's result comes from the sub-execution that
    /// picks it up rather than from this handle.
    struct CalcTool {
        descriptor: ToolDefinition,
    }

    impl CalcTool {
        fn new() -> Self {
            Self {
                descriptor: ToolDefinition {
                    name: "calc".into(),
                    description: "adds two numbers".into(),
                    parameters: serde_json::json!({"type": "object"}),
                },
            }
        }
    }

    #[async_trait::async_trait]
    impl ToolHandler for CalcTool {
        fn descriptor(&self) -> &ToolDefinition {
            &self.descriptor
        }

        async fn invoke(&self, _handle: &ExecutionHandle, _arguments: Value) -> Result<Value, WorkflowError> {
            unreachable!("the agent loop submits tool calls through batch_invoke_and_wait, not direct invoke")
        }
    }

    /// Returns a single tool call on its first call, then a final text reply
    /// with no tool calls on every call after — enough to drive one S4
    /// tool-call round trip.
    #[derive(Debug)]
    struct ScriptedProvider {
        calls: AtomicU32,
    }

    impl ScriptedProvider {
        fn new() -> Self {
            Self { calls: AtomicU32::new(0) }
        }
    }

    #[async_trait::async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, _req: GenerateRequest) -> Result<GenerateResponse, polos_providers::ProviderError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(GenerateResponse {
                    content: String::new(),
                    usage: Usage { input_tokens: 10, output_tokens: 5, total_tokens: 15 },
                    tool_calls: vec![ToolCallRequest {
                        call_id: "call_1".into(),
                        id: None,
                        function: polos_providers::FunctionCall {
                            name: "calc".into(),
                            arguments: serde_json::json!({"a": 2, "b": 2}).to_string(),
                        },
                    }],
                    raw_output: Value::Null,
                    model: "scripted-model".into(),
                    stop_reason: "tool_calls".into(),
                })
            } else {
                Ok(GenerateResponse {
                    content: "4".into(),
                    usage: Usage { input_tokens: 8, output_tokens: 2, total_tokens: 10 },
                    tool_calls: vec![],
                    raw_output: Value::Null,
                    model: "scripted-model".into(),
                    stop_reason: "stop".into(),
                })
            }
        }
    }

    /// Never resolves until dropped — stands in for a provider mid-flight on
    /// a real network call, so a test can race cancellation against it.
    #[derive(Debug)]
    struct BlockingProvider;

    #[async_trait::async_trait]
    impl Provider for BlockingProvider {
        fn name(&self) -> &str {
            "blocking"
        }

        async fn generate(&self, _req: GenerateRequest) -> Result<GenerateResponse, polos_providers::ProviderError> {
            std::future::pending().await
        }
    }

    fn test_handle(client: Arc<InMemoryOrchestrator>) -> ExecutionHandle {
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

    fn has_text_descriptor() -> AgentDescriptor {
        let mut descriptor = AgentDescriptor::new("agent", "scripted", "scripted-model");
        descriptor.tools = vec!["calc".into()];
        descriptor.stop_conditions = vec![StopConditionRef { name: "has_text".into(), params: Value::Null }];
        descriptor
    }

    #[tokio::test]
    async fn tool_call_round_trips_through_a_seeded_execute_tools_step() {
        let client = Arc::new(InMemoryOrchestrator::new());
        // `execute_tools` submits the call through `batch_invoke_and_wait`,
        // which in a real worker resolves once some worker reports the
        // `calc` sub-execution's result back to the orchestrator. Seeding
        // its step record directly stands in for that round trip.
        client.seed_step("exec-1", StepRecord::success("execute_tools:step_1", Some(serde_json::json!([4]))));
        let handle = test_handle(client.clone());

        let descriptor = has_text_descriptor();
        let providers = ProviderRegistry::builder().with(ProviderSpec::Custom(Arc::new(ScriptedProvider::new()))).build();
        let tools = ToolRegistry::builder().with_tool(Arc::new(CalcTool::new())).build();
        let hooks = HookRegistry::builder().build();
        let schemas = SchemaRegistry::new();
        let stops = StopRegistry::default();

        let result =
            run_agent_loop(&handle, &descriptor, Value::String("What is 2+2?".into()), &providers, &tools, &hooks, &schemas, &stops, 10)
                .await
                .unwrap();

        assert_eq!(result.result, Value::String("4".into()));
        assert_eq!(result.tool_results.len(), 1);
        assert_eq!(result.tool_results[0].name, "calc");
        assert_eq!(result.tool_results[0].output, serde_json::json!(4));
        assert!(result.total_steps >= 2);
        assert!(result.usage.total_tokens > 0);
    }

    #[tokio::test]
    async fn cancelling_mid_llm_call_drops_the_loop_without_recording_a_step() {
        let client = Arc::new(InMemoryOrchestrator::new());
        let handle = test_handle(client.clone());

        let descriptor = has_text_descriptor();
        let providers = ProviderRegistry::builder().with(ProviderSpec::Custom(Arc::new(BlockingProvider))).build();
        let tools = ToolRegistry::default();
        let hooks = HookRegistry::builder().build();
        let schemas = SchemaRegistry::new();
        let stops = StopRegistry::default();

        let fut = run_agent_loop(&handle, &descriptor, Value::String("What is 2+2?".into()), &providers, &tools, &hooks, &schemas, &stops, 10);
        tokio::select! {
            _ = fut => panic!("loop should still be awaiting the first LLM call"),
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }

        // Matches the worker's own cancellation path (`dispatch_execution`
        // racing the handler future against the cancel signal): dropping the
        // loop mid-call leaves no `call_llm:step_1` output behind to replay,
        // so a retried execution would start the step over rather than see a
        // half-written record.
        assert!(client.get_step_output("exec-1", "call_llm:step_1.generate.0").await.unwrap().is_none());
    }
}
