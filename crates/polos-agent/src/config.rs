//! `AgentConfig` — the per-call snapshot built at the top of `CALL_LLM`
//! (§4.4 step 3), grounded in `everruns_core::config::AgentConfig`'s role as
//! the immutable bundle threaded into a single LLM call.

use polos_contracts::AgentDescriptor;
use polos_providers::ToolDefinition;
use polos_runtime::SchemaRegistry;
use serde_json::Value;

use crate::tools::ToolRegistry;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub provider: String,
    pub model: String,
    pub system_prompt: Option<String>,
    pub tools: Vec<ToolDefinition>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub provider_kwargs: Value,
    pub output_schema: Option<Value>,
    pub output_schema_name: Option<String>,
    pub guardrail_max_retries: u32,
}

impl AgentConfig {
    /// Resolves a descriptor's tool-name list and structured-output schema
    /// name against their respective registries, capturing everything
    /// `CALL_LLM` needs for one provider round trip.
    pub fn from_descriptor(descriptor: &AgentDescriptor, tools: &ToolRegistry, schemas: &SchemaRegistry) -> Self {
        let resolved = descriptor
            .tools
            .iter()
            .filter_map(|name| tools.get(name).map(|t| t.descriptor().clone()))
            .collect();
        let output_schema = descriptor.structured_output_schema_name.as_deref().and_then(|name| schemas.get(name));
        Self {
            provider: descriptor.provider.clone(),
            model: descriptor.model.clone(),
            system_prompt: descriptor.system_prompt.clone(),
            tools: resolved,
            temperature: descriptor.temperature,
            max_tokens: descriptor.max_output_tokens,
            provider_kwargs: Value::Null,
            output_schema,
            output_schema_name: descriptor.structured_output_schema_name.clone(),
            guardrail_max_retries: descriptor.guardrail_max_retries,
        }
    }
}
