//! Task schema types for the shared session task list

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Task status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task created but not started
    Pending,
    /// Task currently being worked on
    InProgress,
    /// Task finished successfully
    Completed,
    /// Task cancelled or removed
    Deleted,
}

impl TaskStatus {
    /// Completed and deleted tasks no longer need scheduler or leader attention.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Deleted)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Deleted => "deleted",
        };
        write!(f, "{s}")
    }
}

/// Task item in the shared per-session task list
///
/// Stored one file per task at `sessions/{session_id}/tasks/{id}.json`.
/// Ids are sequential decimal strings issued by the store's high-watermark
/// counter and are never reused.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Sequential id ("1", "2", ...)
    pub id: String,

    /// Brief imperative title
    pub subject: String,

    /// Detailed requirements and acceptance criteria
    pub description: String,

    /// Current task status
    pub status: TaskStatus,

    /// Agent name assigned to this task (null if unassigned)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    /// Task ids that must complete before this task can start
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<String>,

    /// Task ids that depend on this task completing
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<String>,

    /// Present continuous form shown while in_progress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_form: Option<String>,

    /// Custom key-value pairs attached by agents
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Unknown fields for forward compatibility
    #[serde(flatten)]
    pub unknown_fields: HashMap<String, serde_json::Value>,
}

/// Merge patch applied by [`crate::store::TaskStore::update_task`]
///
/// Plain fields overwrite, `addBlockedBy`/`addBlocks` union into the
/// existing sets, and `metadata` merges key-by-key — a key explicitly set
/// to JSON `null` deletes that key.
///
/// Deserializes directly from tool-call arguments; unknown keys (such as
/// the `taskId` routing field) are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_form: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub add_blocked_by: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub add_blocks: Option<Vec<String>>,
    /// `Some(Value::Null)` entries delete the key from the task's metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}
