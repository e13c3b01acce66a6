//! Startup registration sequence (§4.1 "Registration"): tells the
//! orchestrator about this deployment's units, queues, event triggers and
//! schedules, then registers the worker process itself and marks it online.
//!
//! Grounded in `WorkerPool::register_worker`'s one-shot startup call, split
//! here into the several orchestrator endpoints §4.1 defines instead of one
//! opaque "register" RPC.

use std::sync::Arc;

use polos_client::types::{QueueSpec, RegisterWorkerRequest};
use polos_client::OrchestratorClient;
use polos_contracts::UnitKind;
use polos_runtime::workflow::UnitRegistry;
use tracing::info;

use crate::config::WorkerConfig;
use crate::error::WorkerError;

/// `agent_descriptors`/`tool_descriptors` carry the full, pre-erasure JSON
/// shape of each `AgentDescriptor`/tool descriptor: `UnitRegistry` only keeps
/// each unit's `WorkflowDescriptor` (kind, schedule, queue), so richer
/// metadata the orchestrator wants for agents and tools has to be supplied
/// separately by the caller that originally built them.
pub async fn register(
    client: &Arc<dyn OrchestratorClient>,
    config: &WorkerConfig,
    units: &UnitRegistry,
    agent_descriptors: &[serde_json::Value],
    tool_descriptors: &[serde_json::Value],
) -> Result<String, WorkerError> {
    let deployment_id = &config.client.deployment_id;
    client.register_deployment(deployment_id).await?;

    for descriptor in agent_descriptors {
        client.register_agent(deployment_id, descriptor.clone()).await?;
    }
    for descriptor in tool_descriptors {
        client.register_tool(deployment_id, descriptor.clone()).await?;
    }

    let mut queues = Vec::new();
    let mut capabilities = Vec::new();

    for descriptor in units.descriptors() {
        descriptor.validate().map_err(WorkerError::Config)?;
        capabilities.push(descriptor.id.clone());

        client
            .register_deployment_workflow(
                deployment_id,
                &descriptor.id,
                kind_str(descriptor.kind),
                descriptor.event_trigger.is_some(),
                descriptor.schedule.is_some(),
            )
            .await?;

        if let Some(queue_name) = &descriptor.queue_name {
            queues.push(QueueSpec { name: queue_name.clone(), concurrency_limit: descriptor.queue_concurrency_limit });
        }
        if let Some(trigger) = &descriptor.event_trigger {
            client
                .register_event_trigger(&descriptor.id, serde_json::to_value(trigger).unwrap_or(serde_json::Value::Null))
                .await?;
        }
        if let Some(schedule) = &descriptor.schedule {
            client
                .register_schedule(&descriptor.id, serde_json::to_value(schedule).unwrap_or(serde_json::Value::Null))
                .await?;
        }
    }

    if !queues.is_empty() {
        client.register_queues(deployment_id, queues).await?;
    }

    let worker_id = client
        .register_worker(RegisterWorkerRequest {
            deployment_id: deployment_id.clone(),
            project_id: config.client.project_id.clone(),
            capabilities,
            max_concurrent: config.max_concurrent_workflows,
            push_url: Some(config.server_url.clone()),
        })
        .await?;
    client.mark_online(&worker_id).await?;
    info!(%worker_id, %deployment_id, "registered with orchestrator");
    Ok(worker_id)
}

fn kind_str(kind: UnitKind) -> &'static str {
    match kind {
        UnitKind::Workflow => "workflow",
        UnitKind::Agent => "agent",
        UnitKind::Tool => "tool",
    }
}
