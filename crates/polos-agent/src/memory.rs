//! Session-memory load and persistence (§4.4 steps 1 and 8), grounded in the
//! original SDK's `polos/memory/compaction.py` window-trimming behavior.
//! Storage itself is the orchestrator's concern
//! (`OrchestratorClient::{get,add}_conversation_history`); this module only
//! owns the window policy and the canonical entry conversion.

use std::sync::Arc;

use polos_providers::{GenerateRequest, HistoryEntry, Provider};
use polos_runtime::{ExecutionHandle, WorkflowError};
use serde_json::Value;

const SUMMARY_USER_PREFIX: &str = "[Prior conversation summary]\n";
const SUMMARY_ASSISTANT_ACK: &str = "Understood, I have context from our earlier conversation.";

const COMPACTION_PROMPT_HEADER: &str = "You are summarizing a conversation between a user and an AI assistant. \
Someone reading only this summary should be able to continue the conversation without the user repeating \
themselves. Capture goals, key facts and constraints, decisions, recommendations and their outcome, artifacts \
produced, and open threads. Write concise narrative paragraphs, not bullet points.";

/// A token-budget compaction policy (§14 supplement, grounded in
/// `polos/memory/compaction.py`'s `NormalizedCompactionConfig`): the
/// message-count window from the distilled spec is only the recency floor;
/// this additionally bounds total history by an approximate token budget.
#[derive(Debug, Clone, Copy)]
pub struct CompactionConfig {
    pub max_conversation_tokens: u32,
    pub min_recent_messages: u32,
    pub max_summary_tokens: u32,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self { max_conversation_tokens: 8_000, min_recent_messages: 10, max_summary_tokens: 500 }
    }
}

/// Rough token estimate (chars / 4), matching the original's heuristic
/// estimator closely enough for a budget check, not a tokenizer.
fn estimate_tokens(text: &str) -> u32 {
    (text.chars().count() as u32 / 4).max(1)
}

fn entry_text(entry: &HistoryEntry) -> String {
    match entry {
        HistoryEntry::System { content } | HistoryEntry::User { content } | HistoryEntry::Assistant { content } => content.clone(),
        HistoryEntry::FunctionCall { name, arguments, .. } => format!("{name}({arguments})"),
        HistoryEntry::FunctionCallOutput { output, .. } => output.clone(),
    }
}

fn estimate_messages_tokens(messages: &[HistoryEntry]) -> u32 {
    messages.iter().map(|m| estimate_tokens(&entry_text(m))).sum()
}

fn is_summary_pair(messages: &[HistoryEntry]) -> bool {
    let (Some(HistoryEntry::User { content: user }), Some(HistoryEntry::Assistant { content: assistant })) =
        (messages.first(), messages.get(1))
    else {
        return false;
    };
    user.starts_with(SUMMARY_USER_PREFIX) && assistant == SUMMARY_ASSISTANT_ACK
}

fn format_messages_for_prompt(messages: &[HistoryEntry]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", role_label(m), entry_text(m)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn role_label(entry: &HistoryEntry) -> &'static str {
    match entry {
        HistoryEntry::System { .. } => "system",
        HistoryEntry::User { .. } => "user",
        HistoryEntry::Assistant { .. } => "assistant",
        HistoryEntry::FunctionCall { .. } => "tool_call",
        HistoryEntry::FunctionCallOutput { .. } => "tool_result",
    }
}

/// `compact_if_needed` (§14 supplement): folds older messages into a rolling
/// summary pair once the estimated token count exceeds the budget, keeping
/// the last `min_recent_messages` verbatim. Falls back to naive truncation
/// if the summarizing LLM call fails, matching the original's behavior of
/// never letting compaction itself abort the run.
pub async fn compact_if_needed(
    handle: &ExecutionHandle,
    step_key_prefix: &str,
    messages: Vec<HistoryEntry>,
    provider: &Arc<dyn Provider>,
    model: &str,
    config: CompactionConfig,
) -> Vec<HistoryEntry> {
    if estimate_messages_tokens(&messages) <= config.max_conversation_tokens {
        return messages;
    }

    let summary_pair_end = if messages.len() >= 2 && is_summary_pair(&messages) { 2 } else { 0 };
    let recent_start = (messages.len().saturating_sub(config.min_recent_messages as usize)).max(summary_pair_end);
    if recent_start <= summary_pair_end {
        return messages;
    }

    let to_fold = &messages[summary_pair_end..recent_start];
    let recent = messages[recent_start..].to_vec();
    let prompt = format!("{COMPACTION_PROMPT_HEADER}\n\nMessages to fold:\n{}", format_messages_for_prompt(to_fold));

    match summarize(handle, &format!("{step_key_prefix}:summarize"), provider, model, &prompt, config.max_summary_tokens).await {
        Ok(summary) => {
            let mut result = vec![
                HistoryEntry::User { content: format!("{SUMMARY_USER_PREFIX}{summary}") },
                HistoryEntry::Assistant { content: SUMMARY_ASSISTANT_ACK.to_string() },
            ];
            result.extend(recent);
            result
        }
        Err(_) => messages[messages.len().saturating_sub(config.min_recent_messages as usize)..].to_vec(),
    }
}

async fn summarize(
    handle: &ExecutionHandle,
    step_key: &str,
    provider: &Arc<dyn Provider>,
    model: &str,
    prompt: &str,
    max_summary_tokens: u32,
) -> Result<String, WorkflowError> {
    let provider = provider.clone();
    let request = GenerateRequest::new(vec![HistoryEntry::User { content: prompt.to_string() }], model.to_string());
    let summary: String = handle
        .run(step_key, move || {
            let provider = provider.clone();
            let request = request.clone();
            async move { provider.generate(request).await.map(|r| r.content).map_err(|e| polos_contracts::StepExecutionError::new(e.to_string())) }
        })
        .await?;
    if estimate_tokens(&summary) > max_summary_tokens {
        return Ok(summary.chars().take((max_summary_tokens * 4) as usize).collect());
    }
    Ok(summary)
}

/// Loads up to `window` prior history entries for `conversation_id`, wrapped
/// in its own durable step so replay never re-fetches.
pub async fn load_conversation_history(
    handle: &ExecutionHandle,
    step_key: &str,
    conversation_id: &str,
    window: Option<u32>,
) -> Result<Vec<HistoryEntry>, WorkflowError> {
    let handle = handle.clone();
    let conversation_id = conversation_id.to_string();
    let handle_for_closure = handle.clone();
    let raw: Vec<Value> = handle
        .run(step_key, move || {
            let handle = handle_for_closure.clone();
            let conversation_id = conversation_id.clone();
            async move {
                handle
                    .client()
                    .get_conversation_history(&conversation_id, window)
                    .await
                    .map_err(|e| polos_contracts::StepExecutionError::new(e.to_string()))
            }
        })
        .await?;
    raw.into_iter()
        .map(|v| serde_json::from_value(v).map_err(|e| WorkflowError::Validation(e.to_string())))
        .collect()
}

/// Appends the user input and the final assistant content to conversation
/// history, bounded by the configured window at read time rather than at
/// write time (the orchestrator owns storage; this call is append-only).
pub async fn persist_conversation_turn(
    handle: &ExecutionHandle,
    step_key: &str,
    conversation_id: &str,
    user_input: &[HistoryEntry],
    assistant_content: &str,
) -> Result<(), WorkflowError> {
    let mut entries: Vec<Value> = user_input.iter().map(|e| serde_json::to_value(e).unwrap_or(Value::Null)).collect();
    entries.push(serde_json::to_value(HistoryEntry::Assistant { content: assistant_content.to_string() }).unwrap_or(Value::Null));
    let handle = handle.clone();
    let conversation_id = conversation_id.to_string();
    let handle_for_closure = handle.clone();
    handle
        .run(step_key, move || {
            let handle = handle_for_closure.clone();
            let conversation_id = conversation_id.clone();
            let entries = entries.clone();
            async move {
                handle
                    .client()
                    .add_conversation_history(&conversation_id, entries)
                    .await
                    .map_err(|e| polos_contracts::StepExecutionError::new(e.to_string()))
            }
        })
        .await
}
