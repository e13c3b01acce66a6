//! Durable step engine, execution context, and workflow core (C2-C4).
//!
//! This crate owns the parts of the runtime that are identical for workflows,
//! agents, and tools: the memoized step primitives, the per-execution handle
//! they operate on, the internal span buffer, and the schema-validation
//! boundary. `polos-agent` and `polos-worker` build on top of it.

pub mod context;
pub mod error;
pub mod schema;
pub mod step;
pub mod telemetry;
pub mod wait;
pub mod workflow;

pub use context::ExecutionHandle;
pub use error::{StepError, WorkflowError};
pub use schema::{SchemaRegistry, SchemaValidationError};
pub use step::AgentRunConfig;
pub use telemetry::{SpanBuffer, SpanRecord};
pub use wait::WaitSignal;
pub use workflow::{HandlerFn, Unit, UnitOutcome, UnitRegistry, UnitResult};
