//! Push-mode worker runtime (C8, §4.7): registers a deployment's units with
//! the orchestrator, then serves an axum push server that accepts pushed
//! executions, dispatches them through `polos_runtime::workflow::UnitRegistry`,
//! and reports outcomes back.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod pool;
pub mod registration;
pub mod server;

pub use config::WorkerConfig;
pub use dispatch::ExecuteRequest;
pub use error::WorkerError;
pub use pool::Worker;
pub use server::{app, AppState};

use std::sync::Arc;

use polos_client::OrchestratorClient;
use polos_runtime::schema::SchemaRegistry;
use polos_runtime::workflow::{Unit, UnitRegistry};
use serde_json::Value;

/// Assembles the units a worker process serves, mirroring the teacher's
/// `WorkerPoolConfig` builder pattern (`new` + chained `with_*`) rather than
/// a derive macro.
#[derive(Default)]
pub struct WorkerBuilder {
    units: Vec<Unit>,
    schemas: SchemaRegistry,
    agent_descriptors: Vec<Value>,
    tool_descriptors: Vec<Value>,
}

impl WorkerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.units.push(unit);
        self
    }

    pub fn with_units(mut self, units: impl IntoIterator<Item = Unit>) -> Self {
        self.units.extend(units);
        self
    }

    pub fn with_schemas(mut self, schemas: SchemaRegistry) -> Self {
        self.schemas = schemas;
        self
    }

    /// Registers the full `AgentDescriptor` JSON for an agent unit already
    /// passed to `with_unit`/`with_units`, so the orchestrator sees its
    /// provider/model/tool metadata rather than just its bare workflow id.
    pub fn with_agent_descriptor(mut self, descriptor: Value) -> Self {
        self.agent_descriptors.push(descriptor);
        self
    }

    pub fn with_tool_descriptor(mut self, descriptor: Value) -> Self {
        self.tool_descriptors.push(descriptor);
        self
    }

    pub fn build(self, config: WorkerConfig, client: Arc<dyn OrchestratorClient>) -> Worker {
        let units = UnitRegistry::new(self.units, self.schemas);
        let mut worker = Worker::new(config, client, units);
        for descriptor in self.agent_descriptors {
            worker = worker.with_agent_descriptor(descriptor);
        }
        for descriptor in self.tool_descriptors {
            worker = worker.with_tool_descriptor(descriptor);
        }
        worker
    }
}
