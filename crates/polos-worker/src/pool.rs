//! `Worker` — the push-mode counterpart to `WorkerPool::{start,shutdown}`.
//!
//! Grounded in `durable::worker::pool::WorkerPool`'s lifecycle shape: start
//! background loops under a shared `watch::channel` shutdown signal, then on
//! shutdown stop accepting new work. Unlike the teacher's pull-mode pool,
//! shutdown here does not wait for in-flight executions to drain — the
//! orchestrator owns reassignment, so releasing them immediately is correct.
//! The poll loop itself is replaced by the axum server in `server.rs`.

use std::sync::atomic::AtomicU64;
use std::sync::{Arc, RwLock};

use polos_client::OrchestratorClient;
use polos_runtime::workflow::UnitRegistry;
use polos_sandbox::SandboxManager;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::WorkerConfig;
use crate::dispatch::CancellationTable;
use crate::error::WorkerError;
use crate::registration;
use crate::server::{app, AppState};

pub struct Worker {
    config: Arc<WorkerConfig>,
    client: Arc<dyn OrchestratorClient>,
    units: UnitRegistry,
    agent_descriptors: Vec<Value>,
    tool_descriptors: Vec<Value>,
    sandboxes: Option<Arc<SandboxManager>>,
}

impl Worker {
    pub fn new(config: WorkerConfig, client: Arc<dyn OrchestratorClient>, units: UnitRegistry) -> Self {
        Self {
            config: Arc::new(config),
            client,
            units,
            agent_descriptors: Vec::new(),
            tool_descriptors: Vec::new(),
            sandboxes: None,
        }
    }

    pub fn with_agent_descriptor(mut self, descriptor: Value) -> Self {
        self.agent_descriptors.push(descriptor);
        self
    }

    pub fn with_tool_descriptor(mut self, descriptor: Value) -> Self {
        self.tool_descriptors.push(descriptor);
        self
    }

    /// Enables sandbox support: sandbox tools registered against this
    /// manager get lifecycle cleanup after every execution and a periodic
    /// idle/orphan sweep for as long as the worker runs.
    pub fn with_sandbox_manager(mut self, manager: Arc<SandboxManager>) -> Self {
        self.sandboxes = Some(manager);
        self
    }

    /// Registers with the orchestrator, serves `/execute`/`/cancel`/`/health`
    /// until `shutdown_signal` resolves, then stops accepting new work and
    /// returns, leaving any in-flight executions for the orchestrator to
    /// reassign.
    pub async fn run(self, shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static) -> Result<(), WorkerError> {
        let worker_id = registration::register(&self.client, &self.config, &self.units, &self.agent_descriptors, &self.tool_descriptors).await?;

        if let Some(sandboxes) = &self.sandboxes {
            sandboxes.set_worker_id(worker_id.clone()).await;
            sandboxes.start_sweep(self.config.sandbox_sweep_interval).await;
        }

        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.config.max_concurrent_workflows as usize));
        let state = Arc::new(AppState {
            units: self.units,
            client: self.client.clone(),
            config: self.config.clone(),
            worker_id: RwLock::new(worker_id.clone()),
            semaphore,
            cancellations: CancellationTable::default(),
            accepted: AtomicU64::new(0),
            sandboxes: self.sandboxes.clone(),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let heartbeat_handle = spawn_heartbeat_loop(
            state.clone(),
            self.agent_descriptors.clone(),
            self.tool_descriptors.clone(),
            self.config.heartbeat_interval,
            shutdown_rx.clone(),
        );

        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!(bind_addr = %self.config.bind_addr, server_url = %self.config.server_url, %worker_id, "worker push server listening");

        let router = app(state.clone());
        let serve_handle = tokio::spawn(async move {
            axum::serve(listener, router).with_graceful_shutdown(shutdown_signal).await
        });

        serve_handle.await.ok();
        shutdown_tx.send(true).ok();
        heartbeat_handle.abort();

        if let Some(sandboxes) = &state.sandboxes {
            sandboxes.stop_sweep().await;
            sandboxes.destroy_all().await;
        }

        Ok(())
    }
}

/// On each tick, heartbeats under the worker's current ID. A `re_register`
/// response replays the full registration sequence and swaps in the new ID
/// everywhere it's read from: `AppState` (so `/health`, report calls, and
/// future `/execute`/`/cancel` worker-ID checks see it) and the sandbox
/// manager's container labels.
fn spawn_heartbeat_loop(
    state: Arc<AppState>,
    agent_descriptors: Vec<Value>,
    tool_descriptors: Vec<Value>,
    interval: std::time::Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let worker_id = state.worker_id();
                    match state.client.heartbeat(&worker_id).await {
                        Ok(resp) if resp.re_register => {
                            warn!(%worker_id, "orchestrator requested re-registration");
                            match registration::register(&state.client, &state.config, &state.units, &agent_descriptors, &tool_descriptors).await {
                                Ok(new_worker_id) => {
                                    info!(old_worker_id = %worker_id, new_worker_id = %new_worker_id, "re-registered with orchestrator");
                                    state.set_worker_id(new_worker_id.clone());
                                    if let Some(sandboxes) = &state.sandboxes {
                                        sandboxes.set_worker_id(new_worker_id).await;
                                    }
                                }
                                Err(e) => error!(%worker_id, %e, "re-registration failed"),
                            }
                        }
                        Ok(_) => {}
                        Err(e) => error!(%worker_id, %e, "heartbeat failed"),
                    }
                }
                _ = shutdown_rx.changed() => {
                    break;
                }
            }
        }
    })
}
