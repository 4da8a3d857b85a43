//! Task specifications and observed task state.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Label keys attached to namespaces and tasks.
pub mod labels {
    pub const TENANT: &str = "cf-space";
    pub const STAGING_ID: &str = "staging-id";
    pub const LIFECYCLE: &str = "lifecycle";
    pub const STAGER_ID: &str = "stager-id";
    pub const APP_ID: &str = "app-id";
    pub const TASK_ID: &str = "task-id";
    /// Control-plane address the requester asked completion to go to.
    pub const COMPLETION_CALLBACK: &str = "completion-callback";
}

/// Non-root user every staging container runs as.
pub const STAGING_RUN_AS_USER: i64 = 2000;

/// Canonical description of one staging task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpecification {
    pub namespace: String,
    pub name: String,
    pub image: String,
    /// `None` keeps the image's entrypoint.
    pub command: Option<Vec<String>>,
    pub environment: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub run_as_user: i64,
}

/// Execution phase of a task as reported by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    NotFound,
}

impl TaskPhase {
    /// Whether the task has finished executing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskPhase::Succeeded | TaskPhase::Failed)
    }
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskPhase::Pending => "pending",
            TaskPhase::Running => "running",
            TaskPhase::Succeeded => "succeeded",
            TaskPhase::Failed => "failed",
            TaskPhase::NotFound => "not_found",
        };
        f.write_str(s)
    }
}

/// A task as observed from the orchestrator. Never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub name: String,
    pub namespace: String,
    pub phase: TaskPhase,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn staging_id(&self) -> Option<&str> {
        self.labels.get(labels::STAGING_ID).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_phases() {
        assert!(TaskPhase::Succeeded.is_terminal());
        assert!(TaskPhase::Failed.is_terminal());
        assert!(!TaskPhase::Pending.is_terminal());
        assert!(!TaskPhase::Running.is_terminal());
        assert!(!TaskPhase::NotFound.is_terminal());
    }

    #[test]
    fn test_phase_serialization() {
        assert_eq!(
            serde_json::to_string(&TaskPhase::NotFound).unwrap(),
            r#""not_found""#
        );
        assert_eq!(TaskPhase::Running.to_string(), "running");
    }

    #[test]
    fn test_record_exposes_staging_id_label() {
        let mut record_labels = BTreeMap::new();
        record_labels.insert(labels::STAGING_ID.to_string(), "stg-1".to_string());
        let record = TaskRecord {
            name: "task-abc".to_string(),
            namespace: "ns-t".to_string(),
            phase: TaskPhase::Running,
            labels: record_labels,
            created_at: None,
        };
        assert_eq!(record.staging_id(), Some("stg-1"));
    }
}
