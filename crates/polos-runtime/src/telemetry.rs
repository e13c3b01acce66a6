//! The internal span buffer backing C3's `trace` primitive and the workflow
//! root span, per §10: "modeled as an internal, dependency-light span buffer
//! rather than a full OTel SDK integration."
//!
//! Grounded in the teacher's `tracing`/`#[instrument]` usage for *process*
//! logging and in §3's Step-trace shape for the *durable* record this module
//! actually buffers and hands to the orchestrator client.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use polos_contracts::deterministic_trace_id;

/// One buffered span, matching §3's Step trace shape.
#[derive(Debug, Clone, Serialize)]
pub struct SpanRecord {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub name: String,
    pub span_type: String,
    pub attributes: Value,
    pub events: Vec<Value>,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub error: Option<Value>,
    pub initial_state: Option<Value>,
    pub final_state: Option<Value>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// An in-memory stack of open spans plus a buffer of finished ones, scoped to
/// one execution. Sequential by construction: §5 guarantees one execution
/// never interleaves two of its own step primitives, so a plain `Mutex`
/// (rather than per-task state) is enough.
pub struct SpanBuffer {
    trace_id: String,
    stack: Mutex<Vec<SpanRecord>>,
    finished: Mutex<Vec<SpanRecord>>,
}

impl SpanBuffer {
    pub fn new(root_execution_id: &str) -> Self {
        Self {
            trace_id: deterministic_trace_id(root_execution_id),
            stack: Mutex::new(Vec::new()),
            finished: Mutex::new(Vec::new()),
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub async fn current_span_id(&self) -> Option<String> {
        self.stack.lock().await.last().map(|s| s.span_id.clone())
    }

    /// Opens a child span named `name` with the current top-of-stack span (if
    /// any) as parent, and pushes it onto the stack.
    pub async fn start_span(&self, name: &str, span_type: &str, attributes: Value) -> String {
        let span_id = new_span_id();
        let parent_span_id = self.current_span_id().await;
        let record = SpanRecord {
            trace_id: self.trace_id.clone(),
            span_id: span_id.clone(),
            parent_span_id,
            name: name.to_string(),
            span_type: span_type.to_string(),
            attributes,
            events: Vec::new(),
            input: None,
            output: None,
            error: None,
            initial_state: None,
            final_state: None,
            started_at: Utc::now(),
            ended_at: None,
        };
        self.stack.lock().await.push(record);
        span_id
    }

    /// Ends the span at the top of the stack, recording success or error, and
    /// moves it into the finished buffer. No-op if the stack is empty (a
    /// defensive case that should never occur given sequential step calls).
    pub async fn end_span(&self, output: Option<Value>, error: Option<Value>) {
        let mut stack = self.stack.lock().await;
        if let Some(mut record) = stack.pop() {
            record.output = output;
            record.error = error;
            record.ended_at = Some(Utc::now());
            drop(stack);
            self.finished.lock().await.push(record);
        }
    }

    /// Drains every finished span for a batch upload to the orchestrator.
    pub async fn drain(&self) -> Vec<SpanRecord> {
        std::mem::take(&mut *self.finished.lock().await)
    }
}

fn new_span_id() -> String {
    let bytes: [u8; 8] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn child_span_parents_to_current_top() {
        let buffer = SpanBuffer::new("4c6f0e2a-1b3c-4d5e-8f90-1234567890ab");
        let root = buffer.start_span("workflow", "workflow", serde_json::json!({})).await;
        let child = buffer.start_span("step", "step", serde_json::json!({})).await;
        buffer.end_span(Some(serde_json::json!(1)), None).await;
        buffer.end_span(Some(serde_json::json!(2)), None).await;
        let finished = buffer.drain().await;
        assert_eq!(finished.len(), 2);
        let child_record = finished.iter().find(|s| s.span_id == child).unwrap();
        assert_eq!(child_record.parent_span_id.as_deref(), Some(root.as_str()));
    }

    #[tokio::test]
    async fn trace_id_matches_deterministic_rule() {
        let id = "4c6f0e2a-1b3c-4d5e-8f90-1234567890ab";
        let buffer = SpanBuffer::new(id);
        assert_eq!(buffer.trace_id(), "4c6f0e2a1b3c4d5e8f901234567890ab");
    }
}
