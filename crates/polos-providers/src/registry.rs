//! A static provider registry keyed by provider name, built once at startup
//! (§9's "Provider polymorphism" redesign note).
//!
//! Grounded in `everruns_core::provider_factory`'s `ProviderConfig`/
//! `create_provider` factory, reshaped from a function that builds one
//! provider per call into a registry built once and shared read-only across
//! every execution the worker runs (§5's "read-only registry after startup").

use std::collections::HashMap;
use std::sync::Arc;

use crate::anthropic::AnthropicProvider;
use crate::error::ProviderError;
use crate::generic::GenericOpenAiCompatibleProvider;
use crate::openai::OpenAiProvider;
use crate::provider::Provider;

/// One entry to register: a provider name plus how to obtain its credential.
#[derive(Clone)]
pub enum ProviderSpec {
    OpenAi { api_key: String, base_url: Option<String> },
    Anthropic { api_key: String, base_url: Option<String> },
    Generic { name: String, api_key: String, base_url: String },
    /// An already-built provider, registered verbatim under its own
    /// `Provider::name()`. Bypasses credential handling entirely — for a
    /// hand-rolled `Provider` impl that doesn't fit the other variants, or
    /// a test double.
    Custom(Arc<dyn Provider>),
}

impl std::fmt::Debug for ProviderSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderSpec::OpenAi { base_url, .. } => f.debug_struct("OpenAi").field("base_url", base_url).finish(),
            ProviderSpec::Anthropic { base_url, .. } => f.debug_struct("Anthropic").field("base_url", base_url).finish(),
            ProviderSpec::Generic { name, base_url, .. } => {
                f.debug_struct("Generic").field("name", name).field("base_url", base_url).finish()
            }
            ProviderSpec::Custom(p) => f.debug_tuple("Custom").field(&p.name()).finish(),
        }
    }
}

impl ProviderSpec {
    fn name(&self) -> &str {
        match self {
            ProviderSpec::OpenAi { .. } => "openai",
            ProviderSpec::Anthropic { .. } => "anthropic",
            ProviderSpec::Generic { name, .. } => name,
            ProviderSpec::Custom(p) => p.name(),
        }
    }

    fn build(self) -> Arc<dyn Provider> {
        match self {
            ProviderSpec::OpenAi { api_key, base_url: None } => Arc::new(OpenAiProvider::new(api_key)),
            ProviderSpec::OpenAi { api_key, base_url: Some(url) } => {
                Arc::new(OpenAiProvider::with_base_url(api_key, url))
            }
            ProviderSpec::Anthropic { api_key, base_url: None } => Arc::new(AnthropicProvider::new(api_key)),
            ProviderSpec::Anthropic { api_key, base_url: Some(url) } => {
                Arc::new(AnthropicProvider::with_base_url(api_key, url))
            }
            ProviderSpec::Generic { name, api_key, base_url } => {
                Arc::new(GenericOpenAiCompatibleProvider::new(name, api_key, base_url))
            }
            ProviderSpec::Custom(provider) => provider,
        }
    }
}

/// A read-only, name-keyed set of providers, built once at worker startup and
/// shared across every execution it runs.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }
}

#[derive(Default)]
pub struct ProviderRegistryBuilder {
    specs: Vec<ProviderSpec>,
}

impl ProviderRegistryBuilder {
    pub fn with(mut self, spec: ProviderSpec) -> Self {
        self.specs.push(spec);
        self
    }

    pub fn build(self) -> ProviderRegistry {
        let providers = self
            .specs
            .into_iter()
            .map(|spec| (spec.name().to_string(), spec.build()))
            .collect();
        ProviderRegistry { providers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_name_is_an_unknown_provider_error() {
        let registry = ProviderRegistry::builder().build();
        let err = registry.get("openai").unwrap_err();
        assert!(matches!(err, ProviderError::UnknownProvider(name) if name == "openai"));
    }

    #[test]
    fn registered_providers_are_retrievable_by_name() {
        let registry = ProviderRegistry::builder()
            .with(ProviderSpec::OpenAi { api_key: "sk-test".into(), base_url: None })
            .with(ProviderSpec::Generic {
                name: "ollama".into(),
                api_key: "unused".into(),
                base_url: "http://localhost:11434/v1/chat/completions".into(),
            })
            .build();
        assert!(registry.get("openai").is_ok());
        assert!(registry.get("ollama").is_ok());
        assert!(registry.get("anthropic").is_err());
    }
}
