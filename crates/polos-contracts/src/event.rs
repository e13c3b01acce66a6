//! Event envelope and canonical topic naming, per §3/§6.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical per-execution-lineage topic: `workflow/{root_workflow_id}/{root_execution_id}`.
pub fn workflow_topic(root_workflow_id: &str, root_execution_id: &str) -> String {
    format!("workflow/{root_workflow_id}/{root_execution_id}")
}

/// Event type names the core emits, matching §6's enumerated list. Kept as a
/// thin wrapper over `String` (not a closed enum) because user code and the
/// orchestrator are both free to mint `suspend_<k>`/`resume_<k>` pairs and
/// other dynamically-named types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(pub String);

impl EventType {
    pub fn suspend(step_key: &str) -> Self {
        Self(format!("suspend_{step_key}"))
    }

    pub fn resume(step_key: &str) -> Self {
        Self(format!("resume_{step_key}"))
    }

    pub fn is_suspend_for(&self, step_key: &str) -> bool {
        self.0 == format!("suspend_{step_key}")
    }

    pub fn is_resume_for(&self, step_key: &str) -> bool {
        self.0 == format!("resume_{step_key}")
    }
}

impl From<&str> for EventType {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single ordered event on a topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub sequence_id: u64,
    pub topic: String,
    pub event_type: Option<EventType>,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// The `_metadata.execution_id` field finish events carry, used by
    /// `stream_events` to decide when an iterator should terminate.
    pub fn metadata_execution_id(&self) -> Option<&str> {
        self.data.get("_metadata")?.get("execution_id")?.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suspend_resume_naming_pairs_up() {
        let suspend = EventType::suspend("approval");
        let resume = EventType::resume("approval");
        assert!(suspend.is_suspend_for("approval"));
        assert!(resume.is_resume_for("approval"));
        assert!(!suspend.is_resume_for("approval"));
        assert_ne!(suspend, resume);
    }

    #[test]
    fn metadata_execution_id_extracted() {
        let ev = Event {
            id: "e1".into(),
            sequence_id: 1,
            topic: "workflow/w/e".into(),
            event_type: Some("agent_finish".into()),
            data: serde_json::json!({"_metadata": {"execution_id": "e-123"}}),
            created_at: Utc::now(),
        };
        assert_eq!(ev.metadata_execution_id(), Some("e-123"));
    }
}
