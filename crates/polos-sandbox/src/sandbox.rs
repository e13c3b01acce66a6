//! `ManagedSandbox` — identity, lifecycle tracking, and lazy coalesced
//! initialization for one `ExecutionEnvironment`, grounded in
//! `examples/original_source/sdk/python/polos/execution/sandbox.py`.
//!
//! Rust has no `asyncio.Future` to hand out to concurrent callers, so init
//! coalescing here follows §9's channel + mutex pattern instead: the first
//! caller to find no environment and no in-flight init takes a lock, starts
//! the init future, and stores a `watch::Receiver` other callers can await
//! while it's running. The watched value carries the env or a stringified
//! error, since `SandboxError` itself isn't `Clone`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use crate::docker::{is_dead_container_error, DockerEnvironment};
use crate::environment::ExecutionEnvironment;
use crate::error::SandboxError;
use crate::local::LocalEnvironment;
use crate::types::{EnvironmentKind, ExecOptions, SandboxScope, SandboxToolsConfig};

const HEALTH_CHECK_DEBOUNCE: Duration = Duration::from_secs(30);

type InitOutcome = Result<Arc<dyn ExecutionEnvironment>, String>;

enum Role {
    Leader(watch::Sender<Option<InitOutcome>>),
    Follower(watch::Receiver<Option<InitOutcome>>),
}

pub struct ManagedSandbox {
    id: String,
    scope: SandboxScope,
    config: SandboxToolsConfig,
    worker_id: String,
    project_id: String,
    session_id: Option<String>,
    active_execution_ids: Mutex<HashSet<String>>,
    last_activity_at: Mutex<Instant>,
    last_health_check_at: Mutex<Option<Instant>>,
    destroyed: AtomicBool,
    env: Mutex<Option<Arc<dyn ExecutionEnvironment>>>,
    init_waiter: Mutex<Option<watch::Receiver<Option<InitOutcome>>>>,
    workspaces_dir: String,
}

impl ManagedSandbox {
    pub fn new(config: SandboxToolsConfig, worker_id: String, project_id: String, session_id: Option<String>, workspaces_dir: String) -> Self {
        let id = config.id.clone().unwrap_or_else(|| format!("sandbox-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]));
        let scope = config.scope.unwrap_or(SandboxScope::Execution);
        Self {
            id,
            scope,
            config,
            worker_id,
            project_id,
            session_id,
            active_execution_ids: Mutex::new(HashSet::new()),
            last_activity_at: Mutex::new(Instant::now()),
            last_health_check_at: Mutex::new(None),
            destroyed: AtomicBool::new(false),
            env: Mutex::new(None),
            init_waiter: Mutex::new(None),
            workspaces_dir,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn scope(&self) -> SandboxScope {
        self.scope
    }

    pub fn config(&self) -> &SandboxToolsConfig {
        &self.config
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub async fn last_activity_at(&self) -> Instant {
        *self.last_activity_at.lock().await
    }

    pub async fn attach_execution(&self, execution_id: &str) {
        self.active_execution_ids.lock().await.insert(execution_id.to_string());
    }

    pub async fn detach_execution(&self, execution_id: &str) {
        self.active_execution_ids.lock().await.remove(execution_id);
    }

    pub async fn has_active_execution(&self, execution_id: &str) -> bool {
        self.active_execution_ids.lock().await.contains(execution_id)
    }

    fn default_workspace_dir(&self) -> String {
        let leaf = self.session_id.clone().unwrap_or_else(|| self.id.clone());
        format!("{}/{}/{}", self.workspaces_dir, self.project_id, leaf)
    }

    /// Returns the shared environment, initializing it on first call and
    /// coalescing any concurrent callers onto the same init future: the
    /// first caller to find no environment and no waiter becomes the
    /// "leader" that actually runs init and broadcasts the outcome;
    /// everyone else just awaits the watch channel it left behind.
    pub async fn get_environment(&self) -> Result<Arc<dyn ExecutionEnvironment>, SandboxError> {
        if self.is_destroyed() {
            return Err(SandboxError::Destroyed(self.id.clone()));
        }
        *self.last_activity_at.lock().await = Instant::now();

        if let Some(env) = self.env.lock().await.clone() {
            self.health_check(&env).await;
            return Ok(env);
        }

        let role = {
            let mut waiter = self.init_waiter.lock().await;
            match waiter.as_ref() {
                Some(rx) => Role::Follower(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    *waiter = Some(rx);
                    Role::Leader(tx)
                }
            }
        };

        match role {
            Role::Leader(tx) => {
                let result = self.initialize_environment().await;
                let outcome: InitOutcome = match &result {
                    Ok(env) => Ok(env.clone()),
                    Err(err) => Err(err.to_string()),
                };
                if let Ok(env) = &result {
                    *self.env.lock().await = Some(env.clone());
                }
                *self.init_waiter.lock().await = None;
                let _ = tx.send(Some(outcome));
                result
            }
            Role::Follower(mut rx) => loop {
                if let Some(outcome) = rx.borrow().clone() {
                    return outcome.map_err(SandboxError::InitFailed);
                }
                if rx.changed().await.is_err() {
                    return Err(SandboxError::InitFailed("sandbox init task dropped".into()));
                }
            },
        }
    }

    async fn health_check(&self, env: &Arc<dyn ExecutionEnvironment>) {
        if env.get_info().kind != EnvironmentKind::Docker {
            return;
        }
        let now = Instant::now();
        {
            let mut last = self.last_health_check_at.lock().await;
            if let Some(prev) = *last {
                if now.duration_since(prev) < HEALTH_CHECK_DEBOUNCE {
                    return;
                }
            }
            *last = Some(now);
        }

        if let Err(err) = env.exec("true", ExecOptions::default()).await {
            let message = err.to_string();
            if is_dead_container_error(&message) {
                warn!(sandbox_id = %self.id, %message, "container is dead, recreating");
                self.recreate().await;
                let _ = Box::pin(self.get_environment()).await;
            }
        }
    }

    /// Best-effort destroy of the current env and a clean slate for the next
    /// `get_environment()` call to re-initialize from.
    pub async fn recreate(&self) {
        info!(sandbox_id = %self.id, "recreating sandbox");
        let old = self.env.lock().await.take();
        if let Some(env) = old {
            if let Err(err) = env.destroy().await {
                warn!(sandbox_id = %self.id, %err, "failed to destroy environment during recreate");
            }
        }
        *self.init_waiter.lock().await = None;
        *self.last_health_check_at.lock().await = None;
        self.destroyed.store(false, Ordering::SeqCst);
    }

    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let env = self.env.lock().await.take();
        if let Some(env) = env {
            if let Err(err) = env.destroy().await {
                warn!(sandbox_id = %self.id, %err, "failed to destroy environment for sandbox");
            }
        }
        *self.init_waiter.lock().await = None;
    }

    async fn initialize_environment(&self) -> Result<Arc<dyn ExecutionEnvironment>, SandboxError> {
        let env_kind = self.config.env.unwrap_or(EnvironmentKind::Docker);
        match env_kind {
            EnvironmentKind::Docker => {
                let mut docker_config = self.config.docker.clone().unwrap_or_else(|| crate::types::DockerEnvironmentConfig::with_image("node:20-slim"));
                let workspace_dir = docker_config.workspace_dir.clone().unwrap_or_else(|| self.default_workspace_dir());
                tokio::fs::create_dir_all(&workspace_dir).await?;
                docker_config.workspace_dir = Some(workspace_dir);

                let max_output_chars = self.config.exec.as_ref().and_then(|e| e.max_output_chars);
                let env = DockerEnvironment::new(docker_config, max_output_chars, &self.id);

                let mut labels = std::collections::HashMap::from([
                    ("polos.managed".to_string(), "true".to_string()),
                    ("polos.sandbox-id".to_string(), self.id.clone()),
                    ("polos.worker-id".to_string(), self.worker_id.clone()),
                ]);
                if let Some(session_id) = &self.session_id {
                    labels.insert("polos.session-id".to_string(), session_id.clone());
                }

                env.initialize(&labels).await?;
                Ok(Arc::new(env))
            }
            EnvironmentKind::Local => {
                let mut local_config = self.config.local.clone().unwrap_or_default();
                let cwd = local_config.cwd.clone().unwrap_or_else(|| self.default_workspace_dir());
                tokio::fs::create_dir_all(&cwd).await?;
                let path_restriction = match local_config.path_restriction.take() {
                    Some(crate::types::PathRestriction::Disabled) => None,
                    Some(crate::types::PathRestriction::Dir(dir)) => Some(crate::types::PathRestriction::Dir(dir)),
                    None => Some(crate::types::PathRestriction::Dir(cwd.clone())),
                };
                local_config.cwd = Some(cwd);
                local_config.path_restriction = path_restriction;

                let max_output_chars = self.config.exec.as_ref().and_then(|e| e.max_output_chars);
                let env = LocalEnvironment::new(local_config, max_output_chars)?;
                env.initialize().await?;
                Ok(Arc::new(env))
            }
            EnvironmentKind::E2b => Err(SandboxError::E2bUnimplemented),
        }
    }
}
