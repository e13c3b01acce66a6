//! Channel bindings (§14 supplement, grounded in `polos/channels/`): a seam
//! for posting/receiving messages through an external surface (Slack, email)
//! bound into an execution context. No concrete third-party binding is
//! implemented here (out of scope, §1) — only the trait, a name-keyed
//! registry following the same read-only-after-startup shape as
//! `ToolRegistry`/`ProviderRegistry`, and an in-memory channel for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel send failed: {0}")]
    SendFailed(String),
}

#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, target: &str, payload: Value) -> Result<(), ChannelError>;
}

#[derive(Clone, Default)]
pub struct ChannelRegistry {
    channels: Arc<HashMap<String, Arc<dyn Channel>>>,
}

impl ChannelRegistry {
    pub fn builder() -> ChannelRegistryBuilder {
        ChannelRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Channel>> {
        self.channels.get(name)
    }
}

#[derive(Default)]
pub struct ChannelRegistryBuilder {
    channels: HashMap<String, Arc<dyn Channel>>,
}

impl ChannelRegistryBuilder {
    pub fn with_channel(mut self, channel: Arc<dyn Channel>) -> Self {
        self.channels.insert(channel.name().to_string(), channel);
        self
    }

    pub fn build(self) -> ChannelRegistry {
        ChannelRegistry { channels: Arc::new(self.channels) }
    }
}

/// An in-memory channel that records every send, for tests and local
/// development; no real third-party binding exists in this crate.
#[derive(Default)]
pub struct InMemoryChannel {
    name: String,
    sent: Mutex<Vec<(String, Value)>>,
}

impl InMemoryChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), sent: Mutex::new(Vec::new()) }
    }

    pub fn sent(&self) -> Vec<(String, Value)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Channel for InMemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, target: &str, payload: Value) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().push((target.to_string(), payload));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registered_channel_records_sends() {
        let channel = Arc::new(InMemoryChannel::new("test"));
        let registry = ChannelRegistry::builder().with_channel(channel.clone()).build();
        registry.get("test").unwrap().send("user-1", serde_json::json!({"text": "hi"})).await.unwrap();
        assert_eq!(channel.sent().len(), 1);
        assert!(registry.get("slack").is_none());
    }
}
