//! Task history entities persisted across restarts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which worker pool a task runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QueueType {
    /// Imports, refreshes, pre-download.
    Download,
    /// Deletes, reorders, offset edits — serialized, single worker.
    Management,
    /// Search/match fallback and on-demand comment download.
    Fallback,
}

/// The lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn is_non_terminal(&self) -> bool {
        !self.is_terminal()
    }
}

/// A durable record of one task submission and its current state.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskHistory {
    pub task_id: Uuid,
    pub title: String,
    pub unique_key: Option<String>,
    pub status: TaskStatus,
    pub progress: i16,
    pub description: String,
    pub queue_type: QueueType,
    pub task_type: Option<String>,
    pub scheduled_task_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskHistory {
    pub fn new_queued(
        title: impl Into<String>,
        unique_key: Option<String>,
        queue_type: QueueType,
        task_type: Option<String>,
        scheduled_task_id: Option<Uuid>,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            title: title.into(),
            unique_key,
            status: TaskStatus::Queued,
            progress: 0,
            description: String::new(),
            queue_type,
            task_type,
            scheduled_task_id,
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// The final outcome of a task, delivered through its `done_event`.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub description: String,
}
