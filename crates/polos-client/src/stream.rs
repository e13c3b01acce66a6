//! SSE consumption for `OrchestratorClient::stream_events`, per §6: "Event
//! streams are consumed as SSE (`data: {...}` lines separated by blank
//! lines, with keepalives and `:`-comments ignored)."
//!
//! Grounded in the teacher's `eventsource-stream` usage for the streaming
//! LLM response path (`everruns-core::openai_protocol`); the shape here is
//! the same "wrap a byte stream, parse `Event` frames, surface a typed
//! stream" idiom applied to orchestrator event topics instead of token deltas.

use std::pin::Pin;

use eventsource_stream::Eventsource;
use futures::stream::{Stream, StreamExt};
use polos_contracts::{ClientError, Event};

/// A live subscription to an orchestrator event topic or workflow run.
///
/// Terminates on a matching `workflow_finish` / `agent_finish` / `tool_finish`
/// event whose `_metadata.execution_id` equals the execution the caller is
/// waiting on (checked by the consumer via [`Event::metadata_execution_id`]),
/// or when the underlying connection closes.
pub struct EventStream {
    inner: Pin<Box<dyn Stream<Item = Result<Event, ClientError>> + Send>>,
}

impl EventStream {
    /// Builds an `EventStream` from a raw byte stream (a `reqwest` response
    /// body in production, a channel-backed stream in tests).
    pub fn from_byte_stream<S, E>(bytes: S) -> Self
    where
        S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let sse = bytes.eventsource();
        let inner = sse.filter_map(|frame| async move {
            let frame = match frame {
                Ok(frame) => frame,
                Err(err) => return Some(Err(ClientError::Transient(err.to_string()))),
            };
            // Keepalives arrive as events with empty data; `:`-comment lines
            // never reach application code through `eventsource-stream`.
            if frame.data.trim().is_empty() {
                return None;
            }
            match serde_json::from_str::<Event>(&frame.data) {
                Ok(event) => Some(Ok(event)),
                Err(err) => Some(Err(ClientError::Serialization(err.to_string()))),
            }
        });
        Self {
            inner: Box::pin(inner),
        }
    }

    /// Wraps an already-typed stream of events, used by the in-memory test
    /// fake where there is no wire format to parse.
    pub fn from_events<S>(events: S) -> Self
    where
        S: Stream<Item = Result<Event, ClientError>> + Send + 'static,
    {
        Self {
            inner: Box::pin(events),
        }
    }

    /// Pulls events until one matching `finish_event_type` with a metadata
    /// `execution_id` equal to `execution_id` is seen, returning that event.
    /// Returns `None` if the stream closes first.
    pub async fn wait_for_finish(
        mut self,
        finish_event_type: &str,
        execution_id: &str,
    ) -> Result<Option<Event>, ClientError> {
        while let Some(event) = self.inner.next().await {
            let event = event?;
            let is_match = event
                .event_type
                .as_ref()
                .map(|t| t.0 == finish_event_type)
                .unwrap_or(false)
                && event.metadata_execution_id().as_deref() == Some(execution_id);
            if is_match {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }
}

impl Stream for EventStream {
    type Item = Result<Event, ClientError>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn event(event_type: &str, execution_id: &str, sequence_id: u64) -> Event {
        Event {
            id: uuid::Uuid::new_v4().to_string(),
            sequence_id,
            topic: "workflow/wf/exec-1".into(),
            event_type: Some(event_type.into()),
            data: json!({"_metadata": {"execution_id": execution_id}}),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn wait_for_finish_ignores_events_for_other_executions() {
        let events = vec![
            Ok(event("workflow_finish", "exec-other", 1)),
            Ok(event("workflow_finish", "exec-1", 2)),
        ];
        let stream = EventStream::from_events(futures::stream::iter(events));
        let found = stream
            .wait_for_finish("workflow_finish", "exec-1")
            .await
            .unwrap();
        assert_eq!(found.unwrap().sequence_id, 2);
    }

    #[tokio::test]
    async fn wait_for_finish_returns_none_on_stream_close() {
        let events: Vec<Result<Event, ClientError>> = vec![Ok(event("progress", "exec-1", 1))];
        let stream = EventStream::from_events(futures::stream::iter(events));
        let found = stream
            .wait_for_finish("workflow_finish", "exec-1")
            .await
            .unwrap();
        assert!(found.is_none());
    }
}
