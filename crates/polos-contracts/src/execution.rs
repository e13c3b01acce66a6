//! Execution context identity — the immutable half of §3's "Execution context".
//!
//! Grounded in `durable::activity::ActivityContext` (an immutable identity struct
//! handed to user code) generalized to the workflow/agent lineage this platform
//! tracks (parent/root execution, session/user, inbound trace).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::trace::TraceParent;

/// Parent/root lineage of an execution. A root execution has
/// `parent_execution_id = None` and `root_execution_id == execution_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLineage {
    pub parent_execution_id: Option<String>,
    pub root_workflow_id: String,
    pub root_execution_id: String,
}

/// Immutable execution identity, passed by reference into every step
/// primitive and hook. The mutable typed state object lives alongside this in
/// the per-unit execution context constructed by `polos_runtime` (kept out of
/// this crate because its shape is generic over the user's state type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub workflow_id: String,
    pub execution_id: String,
    pub deployment_id: String,
    pub lineage: ExecutionLineage,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    pub inbound_traceparent: Option<TraceParent>,
    pub previous_resume_span_id: Option<String>,
}

impl ExecutionContext {
    pub fn is_root(&self) -> bool {
        self.lineage.parent_execution_id.is_none()
    }

    /// Canonical event topic for this execution's lineage, per §3/§6.
    pub fn workflow_topic(&self) -> String {
        crate::event::workflow_topic(&self.lineage.root_workflow_id, &self.lineage.root_execution_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ExecutionContext {
        ExecutionContext {
            workflow_id: "wf".into(),
            execution_id: "exec-1".into(),
            deployment_id: "dep".into(),
            lineage: ExecutionLineage {
                parent_execution_id: None,
                root_workflow_id: "wf".into(),
                root_execution_id: "exec-1".into(),
            },
            session_id: None,
            user_id: None,
            conversation_id: None,
            created_at: Utc::now(),
            retry_count: 0,
            inbound_traceparent: None,
            previous_resume_span_id: None,
        }
    }

    #[test]
    fn root_execution_has_no_parent() {
        assert!(ctx().is_root());
    }

    #[test]
    fn topic_uses_root_lineage() {
        assert_eq!(ctx().workflow_topic(), "workflow/wf/exec-1");
    }
}
