//! Shared type contracts for the Polos client runtime.
//!
//! Every other crate in the workspace depends on this one for the data model
//! described by the platform: unit descriptors, execution identity, step/wait
//! records, events, and the canonical JSON-safe serialization helpers used to
//! tag typed payloads across the orchestrator boundary.

pub mod descriptor;
pub mod error;
pub mod event;
pub mod execution;
pub mod serialize;
pub mod step;
pub mod trace;

pub use descriptor::{
    AgentDescriptor, EventTrigger, GuardrailRef, LifecycleHooks, ScheduleSpec, StopConditionRef,
    UnitKind, WorkflowDescriptor,
};
pub use error::{ClientError, StepExecutionError};
pub use event::{Event, EventType, workflow_topic};
pub use execution::{ExecutionContext, ExecutionLineage};
pub use serialize::{SizeLimitError, TypedValue, MAX_STATE_BYTES};
pub use step::{StepRecord, StepStatus, WaitRecord, WaitType};
pub use trace::{deterministic_trace_id, TraceParent};
