//! Worker configuration, loaded from the environment per §11.
//!
//! Grounded in `polos_client::ClientConfig`'s `dotenvy::dotenv().ok()` +
//! env-var-with-defaults idiom, extended with the push-server and
//! concurrency keys §11 adds for the worker runtime specifically.

use std::env;
use std::time::Duration;

use polos_client::ClientConfig;

use crate::error::WorkerError;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub client: ClientConfig,
    /// URL the orchestrator should push executions to, registered verbatim
    /// as `RegisterWorkerRequest::push_url`.
    pub server_url: String,
    pub bind_addr: String,
    pub max_concurrent_workflows: u32,
    pub wait_threshold: Duration,
    pub heartbeat_interval: Duration,
    pub agent_max_steps: u32,
    pub sandbox_workspaces_dir: String,
    pub sandbox_sweep_interval: Duration,
    pub sandbox_orphan_grace: Duration,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, WorkerError> {
        dotenvy::dotenv().ok();

        let client = ClientConfig::from_env().map_err(|e| WorkerError::Config(e.to_string()))?;

        let server_url = env::var("POLOS_WORKER_SERVER_URL")
            .map_err(|_| WorkerError::Config("POLOS_WORKER_SERVER_URL is required".into()))?;
        let bind_addr = bind_addr_from_server_url(&server_url)?;

        let max_concurrent_workflows = env_parse("POLOS_MAX_CONCURRENT_WORKFLOWS", 100)?;
        let wait_threshold = Duration::from_secs(env_parse("POLOS_WAIT_THRESHOLD_SECONDS", 10)?);
        let heartbeat_interval = Duration::from_secs(env_parse("POLOS_HEARTBEAT_INTERVAL_SECONDS", 30)?);
        let agent_max_steps = env_parse("POLOS_AGENT_MAX_STEPS", 10)?;

        let sandbox_workspaces_dir = env::var("POLOS_WORKSPACES_DIR").unwrap_or_else(|_| default_workspaces_dir());
        let sandbox_sweep_interval = Duration::from_secs(env_parse("POLOS_SANDBOX_SWEEP_INTERVAL_SECONDS", 600)?);
        let sandbox_orphan_grace = Duration::from_secs(env_parse("POLOS_SANDBOX_ORPHAN_GRACE_SECONDS", 1800)?);

        Ok(Self {
            client,
            server_url,
            bind_addr,
            max_concurrent_workflows,
            wait_threshold,
            heartbeat_interval,
            agent_max_steps,
            sandbox_workspaces_dir,
            sandbox_sweep_interval,
            sandbox_orphan_grace,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, WorkerError> {
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| WorkerError::Config(format!("{key} is not a valid value"))),
        Err(_) => Ok(default),
    }
}

fn default_workspaces_dir() -> String {
    match std::env::var("HOME") {
        Ok(home) => format!("{home}/.polos/workspaces"),
        Err(_) => "/tmp/polos/workspaces".to_string(),
    }
}

/// Derives a bind address (`0.0.0.0:<port>`) from the advertised server URL,
/// since the orchestrator only needs the latter to reach this worker and the
/// worker itself should bind on every interface.
fn bind_addr_from_server_url(server_url: &str) -> Result<String, WorkerError> {
    let without_scheme = server_url.split("://").last().unwrap_or(server_url);
    let host_port = without_scheme.split('/').next().unwrap_or(without_scheme);
    let port = host_port
        .rsplit_once(':')
        .map(|(_, port)| port)
        .ok_or_else(|| WorkerError::Config(format!("POLOS_WORKER_SERVER_URL must include a port: {server_url}")))?;
    port.parse::<u16>()
        .map_err(|_| WorkerError::Config(format!("POLOS_WORKER_SERVER_URL has an invalid port: {server_url}")))?;
    Ok(format!("0.0.0.0:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_addr_is_derived_from_advertised_url() {
        assert_eq!(bind_addr_from_server_url("http://worker-1.internal:9000").unwrap(), "0.0.0.0:9000");
        assert_eq!(bind_addr_from_server_url("https://worker-1.internal:9443/").unwrap(), "0.0.0.0:9443");
    }

    #[test]
    fn bind_addr_requires_a_port() {
        assert!(bind_addr_from_server_url("http://worker-1.internal").is_err());
    }
}
