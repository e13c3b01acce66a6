//! Client configuration, loaded from the environment per §11.
//!
//! Grounded in the teacher's `dotenvy::dotenv().ok()` + env-var-with-defaults
//! idiom (seen across `everruns-worker`'s startup path) and built with a
//! plain builder rather than a derive macro, matching the teacher's
//! `WorkerPoolConfig` builder in `durable::worker::pool`.

use std::env;

use polos_contracts::ClientError;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub project_id: String,
    pub deployment_id: String,
    pub local_mode: bool,
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Loads configuration from the environment, calling `dotenvy::dotenv()`
    /// first so a local `.env` file can supply values in development.
    pub fn from_env() -> Result<Self, ClientError> {
        dotenvy::dotenv().ok();

        let project_id = env::var("POLOS_PROJECT_ID")
            .map_err(|_| ClientError::Permanent("POLOS_PROJECT_ID is required".into()))?;
        let deployment_id = env::var("POLOS_DEPLOYMENT_ID")
            .map_err(|_| ClientError::Permanent("POLOS_DEPLOYMENT_ID is required".into()))?;
        let api_url =
            env::var("POLOS_API_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());
        let api_key = env::var("POLOS_API_KEY").ok();
        let local_mode = env::var("POLOS_LOCAL_MODE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let config = Self {
            api_url,
            api_key,
            project_id,
            deployment_id,
            local_mode,
        };
        config.validate()?;
        Ok(config)
    }

    /// Local mode skips bearer auth, but only against a localhost orchestrator
    /// — running unauthenticated against a remote URL is refused outright.
    fn validate(&self) -> Result<(), ClientError> {
        if self.local_mode && !is_localhost(&self.api_url) {
            return Err(ClientError::Permanent(
                "POLOS_LOCAL_MODE requires POLOS_API_URL to point at localhost".into(),
            ));
        }
        Ok(())
    }

    pub fn requires_auth(&self) -> bool {
        !self.local_mode
    }
}

fn is_localhost(url: &str) -> bool {
    url.contains("localhost") || url.contains("127.0.0.1")
}

#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    api_url: Option<String>,
    api_key: Option<String>,
    project_id: Option<String>,
    deployment_id: Option<String>,
    local_mode: bool,
}

impl ClientConfigBuilder {
    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = Some(url.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn project_id(mut self, id: impl Into<String>) -> Self {
        self.project_id = Some(id.into());
        self
    }

    pub fn deployment_id(mut self, id: impl Into<String>) -> Self {
        self.deployment_id = Some(id.into());
        self
    }

    pub fn local_mode(mut self, enabled: bool) -> Self {
        self.local_mode = enabled;
        self
    }

    pub fn build(self) -> Result<ClientConfig, ClientError> {
        let config = ClientConfig {
            api_url: self.api_url.unwrap_or_else(|| "http://localhost:8080".to_string()),
            api_key: self.api_key,
            project_id: self
                .project_id
                .ok_or_else(|| ClientError::Permanent("project_id is required".into()))?,
            deployment_id: self
                .deployment_id
                .ok_or_else(|| ClientError::Permanent("deployment_id is required".into()))?,
            local_mode: self.local_mode,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_mode_against_remote_host_is_rejected() {
        let result = ClientConfig::builder()
            .api_url("https://orchestrator.example.com")
            .project_id("p")
            .deployment_id("d")
            .local_mode(true)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn local_mode_against_localhost_is_accepted() {
        let result = ClientConfig::builder()
            .api_url("http://localhost:8080")
            .project_id("p")
            .deployment_id("d")
            .local_mode(true)
            .build();
        assert!(result.is_ok());
    }
}
