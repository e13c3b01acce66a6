//! The `Provider` trait — §4.6's `generate`/`stream` contract.
//!
//! Grounded in `everruns_core::llm::LlmProvider`: an `async_trait` with a
//! streaming primitive and a default non-streaming method built by draining
//! the stream. Here the default direction is reversed relative to the
//! teacher (`generate` is the primitive, `stream` degrades to one `Done`
//! event) because most of this spec's call sites (guardrail/structured-output
//! retries, tool-calling agent steps) call `generate`, and only the top-level
//! `CALL_LLM` state needs real token-level streaming.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::ProviderError;
use crate::types::{GenerateRequest, GenerateResponse, StreamEvent};

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ProviderError>> + Send>>;

#[async_trait]
pub trait Provider: std::fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, req: GenerateRequest) -> Result<GenerateResponse, ProviderError>;

    /// Default: synthesize a single `Done` event from `generate`. Providers
    /// that support real token streaming (OpenAI, Anthropic) override this.
    async fn stream(&self, req: GenerateRequest) -> Result<EventStream, ProviderError> {
        let response = self.generate(req).await?;
        let events = vec![Ok(StreamEvent::Done(response))];
        Ok(Box::pin(futures::stream::iter(events)))
    }
}
