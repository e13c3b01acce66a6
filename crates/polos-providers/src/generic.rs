//! One generic OpenAI-compatible HTTP provider, covering self-hosted and
//! third-party endpoints that speak the chat-completions wire format (the
//! original SDK's `litellm_provider.py`/`ollama.py`/`groq.py`/`fireworks.py`/
//! `together.py` all reduce to this shape, per §4.6's supplement note).
//!
//! A thin `OpenAiProvider` wrapper rather than a new implementation, mirroring
//! `everruns_openai::provider::OpenAiDriver`'s "wrap the core provider with a
//! different constructor" pattern.

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::openai::OpenAiProvider;
use crate::provider::{EventStream, Provider};
use crate::types::{GenerateRequest, GenerateResponse};

pub struct GenericOpenAiCompatibleProvider {
    name: String,
    inner: OpenAiProvider,
}

impl GenericOpenAiCompatibleProvider {
    pub fn new(name: impl Into<String>, api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: OpenAiProvider::with_base_url(api_key, base_url),
        }
    }
}

#[async_trait]
impl Provider for GenericOpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, req: GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        self.inner.generate(req).await
    }

    async fn stream(&self, req: GenerateRequest) -> Result<EventStream, ProviderError> {
        self.inner.stream(req).await
    }
}

impl std::fmt::Debug for GenericOpenAiCompatibleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenericOpenAiCompatibleProvider").field("name", &self.name).finish()
    }
}
