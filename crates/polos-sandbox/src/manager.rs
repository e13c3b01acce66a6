//! `SandboxManager` — sandbox creation, session reuse, idle cleanup, and
//! orphan container detection. Lives on the worker, grounded in
//! `examples/original_source/sdk/python/polos/execution/sandbox_manager.py`.

use std::collections::HashMap;
use std::sync::Arc;

use polos_client::OrchestratorClient;
use tokio::process::Command;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::duration::parse_duration;
use crate::error::SandboxError;
use crate::sandbox::ManagedSandbox;
use crate::types::{SandboxScope, SandboxToolsConfig};

const DEFAULT_IDLE_TIMEOUT: &str = "1h";
/// Fallback used only when `SandboxManager` is built with `new`; callers that
/// read `POLOS_SANDBOX_ORPHAN_GRACE_SECONDS` should prefer `with_orphan_grace`.
const DEFAULT_ORPHAN_GRACE_PERIOD: std::time::Duration = std::time::Duration::from_secs(30 * 60);

pub struct SandboxManager {
    worker_id: RwLock<String>,
    project_id: String,
    workspaces_dir: String,
    client: Option<Arc<dyn OrchestratorClient>>,
    sandboxes: RwLock<HashMap<String, Arc<ManagedSandbox>>>,
    session_sandboxes: RwLock<HashMap<String, Arc<ManagedSandbox>>>,
    session_creation_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    sweep_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    orphan_grace_period: std::time::Duration,
}

impl SandboxManager {
    pub fn new(worker_id: String, project_id: String, workspaces_dir: String, client: Option<Arc<dyn OrchestratorClient>>) -> Arc<Self> {
        Self::with_orphan_grace(worker_id, project_id, workspaces_dir, client, DEFAULT_ORPHAN_GRACE_PERIOD)
    }

    /// As `new`, but with an explicit orphan-container grace period, normally
    /// sourced from `POLOS_SANDBOX_ORPHAN_GRACE_SECONDS`.
    pub fn with_orphan_grace(
        worker_id: String,
        project_id: String,
        workspaces_dir: String,
        client: Option<Arc<dyn OrchestratorClient>>,
        orphan_grace_period: std::time::Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            worker_id: RwLock::new(worker_id),
            project_id,
            workspaces_dir,
            client,
            sandboxes: RwLock::new(HashMap::new()),
            session_sandboxes: RwLock::new(HashMap::new()),
            session_creation_locks: Mutex::new(HashMap::new()),
            sweep_handle: Mutex::new(None),
            orphan_grace_period,
        })
    }

    /// Updates the worker ID after a re-registration; new sandboxes pick it
    /// up for their `polos.worker-id` label.
    pub async fn set_worker_id(&self, worker_id: String) {
        *self.worker_id.write().await = worker_id;
    }

    pub async fn get_or_create_sandbox(
        self: &Arc<Self>,
        config: SandboxToolsConfig,
        execution_id: &str,
        session_id: Option<&str>,
    ) -> Result<Arc<ManagedSandbox>, SandboxError> {
        let scope = config.scope.unwrap_or(SandboxScope::Execution);

        if scope == SandboxScope::Session {
            let session_id = session_id.ok_or(SandboxError::MissingSessionId)?;

            if let Some(existing) = self.session_sandboxes.read().await.get(session_id) {
                if !existing.is_destroyed() {
                    existing.attach_execution(execution_id).await;
                    return Ok(existing.clone());
                }
            }

            let lock = {
                let mut locks = self.session_creation_locks.lock().await;
                locks.entry(session_id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
            };
            let _guard = lock.lock().await;

            if let Some(existing) = self.session_sandboxes.read().await.get(session_id) {
                if !existing.is_destroyed() {
                    existing.attach_execution(execution_id).await;
                    return Ok(existing.clone());
                }
            }

            let worker_id = self.worker_id.read().await.clone();
            let sandbox = Arc::new(ManagedSandbox::new(
                config,
                worker_id,
                self.project_id.clone(),
                Some(session_id.to_string()),
                self.workspaces_dir.clone(),
            ));
            sandbox.attach_execution(execution_id).await;
            self.sandboxes.write().await.insert(sandbox.id().to_string(), sandbox.clone());
            self.session_sandboxes.write().await.insert(session_id.to_string(), sandbox.clone());
            return Ok(sandbox);
        }

        let worker_id = self.worker_id.read().await.clone();
        let sandbox = Arc::new(ManagedSandbox::new(config, worker_id, self.project_id.clone(), None, self.workspaces_dir.clone()));
        sandbox.attach_execution(execution_id).await;
        self.sandboxes.write().await.insert(sandbox.id().to_string(), sandbox.clone());
        Ok(sandbox)
    }

    /// Execution-scoped sandboxes are 1:1 with executions and are destroyed
    /// as soon as the execution completes. Session-scoped ones survive for
    /// the idle sweep to reap.
    pub async fn on_execution_complete(&self, execution_id: &str) {
        let candidates: Vec<Arc<ManagedSandbox>> = self.sandboxes.read().await.values().cloned().collect();
        for sandbox in candidates {
            if !sandbox.has_active_execution(execution_id).await {
                continue;
            }
            sandbox.detach_execution(execution_id).await;
            if sandbox.scope() == SandboxScope::Execution {
                self.destroy_and_remove(sandbox.id()).await;
            }
        }
    }

    pub async fn destroy_sandbox(&self, sandbox_id: &str) {
        self.destroy_and_remove(sandbox_id).await;
    }

    pub async fn destroy_all(&self) {
        let entries: Vec<Arc<ManagedSandbox>> = self.sandboxes.write().await.drain().map(|(_, v)| v).collect();
        for sandbox in entries {
            sandbox.destroy().await;
        }
        self.session_sandboxes.write().await.clear();
    }

    async fn destroy_and_remove(&self, sandbox_id: &str) {
        let sandbox = self.sandboxes.write().await.remove(sandbox_id);
        let Some(sandbox) = sandbox else { return };
        sandbox.destroy().await;
        if let Some(session_id) = sandbox.session_id() {
            let mut sessions = self.session_sandboxes.write().await;
            if sessions.get(session_id).is_some_and(|s| Arc::ptr_eq(s, &sandbox)) {
                sessions.remove(session_id);
            }
        }
    }

    pub fn get_sandbox(&self, sandbox_id: &str) -> Option<Arc<ManagedSandbox>> {
        self.sandboxes.try_read().ok()?.get(sandbox_id).cloned()
    }

    /// Starts the background sweep loop (idle sandboxes, then orphan
    /// containers) on `interval`, replacing any loop already running.
    pub async fn start_sweep(self: &Arc<Self>, interval: std::time::Duration) {
        self.stop_sweep().await;
        let manager = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.sweep_idle_sandboxes().await;
                manager.sweep_orphan_containers().await;
            }
        });
        *self.sweep_handle.lock().await = Some(handle);
    }

    pub async fn stop_sweep(&self) {
        if let Some(handle) = self.sweep_handle.lock().await.take() {
            handle.abort();
        }
    }

    async fn sweep_idle_sandboxes(&self) {
        let candidates: Vec<Arc<ManagedSandbox>> = self.sandboxes.read().await.values().cloned().collect();
        for sandbox in candidates {
            let timeout_str = sandbox.config().idle_destroy_timeout.as_deref().unwrap_or(DEFAULT_IDLE_TIMEOUT);
            let timeout = match parse_duration(timeout_str) {
                Ok(d) => d,
                Err(err) => {
                    warn!(sandbox_id = sandbox.id(), %err, "invalid idle_destroy_timeout, skipping sweep for sandbox");
                    continue;
                }
            };
            let idle = sandbox.last_activity_at().await.elapsed();
            if idle > timeout {
                info!(sandbox_id = sandbox.id(), idle_secs = idle.as_secs(), "destroying idle sandbox");
                self.destroy_and_remove(sandbox.id()).await;
            }
        }
    }

    async fn sweep_orphan_containers(&self) {
        let Some(client) = &self.client else { return };
        let active_worker_ids = match client.get_active_worker_ids().await {
            Ok(ids) => ids,
            Err(err) => {
                warn!(%err, "failed to query active workers, skipping orphan cleanup");
                return;
            }
        };

        let output = Command::new("docker")
            .args([
                "ps",
                "-a",
                "--filter",
                "label=polos.managed=true",
                "--format",
                "{{.Names}}\t{{.Label \"polos.worker-id\"}}\t{{.CreatedAt}}",
            ])
            .output()
            .await;
        let output = match output {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                warn!(stderr = %String::from_utf8_lossy(&output.stderr), "docker ps failed during orphan sweep");
                return;
            }
            Err(err) => {
                warn!(%err, "failed to run docker ps during orphan sweep");
                return;
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines() {
            let parts: Vec<&str> = line.splitn(3, '\t').collect();
            let [name, worker_id, created_at] = parts[..] else { continue };
            if name.is_empty() || worker_id.is_empty() {
                continue;
            }
            if active_worker_ids.contains(worker_id) {
                continue;
            }
            let Some(age) = docker_created_age(created_at) else { continue };
            if age < self.orphan_grace_period {
                continue;
            }

            info!(container = name, worker_id, "removing orphaned container");
            if let Err(err) = Command::new("docker").args(["rm", "-f", name]).output().await {
                warn!(container = name, %err, "failed to remove orphaned container");
            }
        }
    }
}

/// Parses Docker's `CreatedAt` format, e.g. `"2024-01-02 15:04:05 -0700 MST"`,
/// by taking just the date/time/offset fields and ignoring the trailing zone
/// abbreviation; falls back to RFC3339. Returns how long ago that was.
fn docker_created_age(created_at: &str) -> Option<std::time::Duration> {
    let trimmed = created_at.trim();
    let fields: Vec<&str> = trimmed.splitn(4, ' ').collect();
    let created = if fields.len() >= 3 {
        let prefix = format!("{} {} {}", fields[0], fields[1], fields[2]);
        chrono::DateTime::parse_from_str(&prefix, "%Y-%m-%d %H:%M:%S %z").ok()
    } else {
        None
    };
    let created = created.or_else(|| chrono::DateTime::parse_from_rfc3339(trimmed).ok())?;
    let age = chrono::Utc::now().signed_duration_since(created.with_timezone(&chrono::Utc));
    age.to_std().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docker_created_age_parses_standard_format() {
        let recent = chrono::Utc::now() - chrono::Duration::seconds(5);
        let formatted = recent.format("%Y-%m-%d %H:%M:%S %z UTC").to_string();
        let age = docker_created_age(&formatted);
        assert!(age.is_some());
        assert!(age.unwrap().as_secs() < 60);
    }

    #[test]
    fn docker_created_age_rejects_garbage() {
        assert!(docker_created_age("not a date").is_none());
    }
}
