//! The `Wait` unwinding signal, per §9: "model step primitives as returning a
//! sum type `Either<Wait, T>`... no user code may observe or catch `Wait`."
//!
//! In Rust this is `WorkflowError::Wait(WaitSignal)` propagated with `?`; this
//! module only carries the payload the dispatcher (C8) and workflow core (C4)
//! need to react correctly — which wait record was written and why.

use polos_contracts::{WaitRecord, WaitType};
use thiserror::Error;

/// Carries just enough information for the workflow core to mark the current
/// span as waiting and persist its ID before re-raising, per §4.3 step 6.
#[derive(Debug, Error, Clone)]
#[error("execution waiting: {wait_type:?} ({step_key})")]
pub struct WaitSignal {
    pub wait_type: WaitType,
    pub step_key: String,
    pub record: WaitRecord,
}

impl WaitSignal {
    pub fn new(record: WaitRecord) -> Self {
        Self {
            wait_type: record.wait_type,
            step_key: record.step_key.clone(),
            record,
        }
    }
}
