//! Durable storage for [`TaskHistory`] rows, abstracted behind a trait
//! so the manager's dedup/reconciliation logic can be exercised without
//! a database.

use async_trait::async_trait;
use chrono::Utc;
use danmaku_core::Result;
use dashmap::DashMap;
use sqlx::PgPool;
use uuid::Uuid;

use crate::model::{TaskHistory, TaskStatus};

#[async_trait]
pub trait TaskHistoryRepository: Send + Sync {
    async fn insert(&self, task: &TaskHistory) -> Result<()>;
    async fn update(&self, task: &TaskHistory) -> Result<()>;
    async fn find_active_by_unique_key(&self, unique_key: &str) -> Result<Option<TaskHistory>>;
    async fn get(&self, task_id: Uuid) -> Result<Option<TaskHistory>>;

    /// Reconcile in-flight rows on process restart: every row left in
    /// `queued`, `running`, or `paused` is transitioned to `failed`
    /// with a "process restarted" note, since no in-memory state
    /// survived the restart to finish them. Returns the number reconciled.
    async fn reconcile_on_restart(&self) -> Result<usize>;
}

/// Process-local implementation for tests and single-process
/// deployments that don't need cross-restart durability.
#[derive(Default, Clone)]
pub struct InMemoryTaskHistoryRepository {
    rows: std::sync::Arc<DashMap<Uuid, TaskHistory>>,
}

impl InMemoryTaskHistoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskHistoryRepository for InMemoryTaskHistoryRepository {
    async fn insert(&self, task: &TaskHistory) -> Result<()> {
        self.rows.insert(task.task_id, task.clone());
        Ok(())
    }

    async fn update(&self, task: &TaskHistory) -> Result<()> {
        self.rows.insert(task.task_id, task.clone());
        Ok(())
    }

    async fn find_active_by_unique_key(&self, unique_key: &str) -> Result<Option<TaskHistory>> {
        Ok(self
            .rows
            .iter()
            .find(|e| e.unique_key.as_deref() == Some(unique_key) && e.status.is_non_terminal())
            .map(|e| e.value().clone()))
    }

    async fn get(&self, task_id: Uuid) -> Result<Option<TaskHistory>> {
        Ok(self.rows.get(&task_id).map(|e| e.value().clone()))
    }

    async fn reconcile_on_restart(&self) -> Result<usize> {
        let mut reconciled = 0;
        for mut entry in self.rows.iter_mut() {
            if entry.status.is_non_terminal() {
                entry.status = TaskStatus::Failed;
                entry.description = "process restarted".to_string();
                entry.finished_at = Some(Utc::now());
                reconciled += 1;
            }
        }
        Ok(reconciled)
    }
}

/// Postgres-backed implementation; the row shape matches the `TaskHistory`
/// entity named in the platform's data model.
pub struct PgTaskHistoryRepository {
    pool: PgPool,
}

impl PgTaskHistoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskHistoryRepository for PgTaskHistoryRepository {
    async fn insert(&self, task: &TaskHistory) -> Result<()> {
        sqlx::query(
            "INSERT INTO task_history
                (task_id, title, unique_key, status, progress, description,
                 queue_type, task_type, scheduled_task_id, created_at, finished_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(task.task_id)
        .bind(&task.title)
        .bind(&task.unique_key)
        .bind(task.status)
        .bind(task.progress)
        .bind(&task.description)
        .bind(task.queue_type)
        .bind(&task.task_type)
        .bind(task.scheduled_task_id)
        .bind(task.created_at)
        .bind(task.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, task: &TaskHistory) -> Result<()> {
        sqlx::query(
            "UPDATE task_history
             SET status = $2, progress = $3, description = $4, finished_at = $5
             WHERE task_id = $1",
        )
        .bind(task.task_id)
        .bind(task.status)
        .bind(task.progress)
        .bind(&task.description)
        .bind(task.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_active_by_unique_key(&self, unique_key: &str) -> Result<Option<TaskHistory>> {
        let row = sqlx::query_as::<_, TaskHistory>(
            "SELECT * FROM task_history
             WHERE unique_key = $1 AND status IN ('queued', 'running', 'paused')
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(unique_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get(&self, task_id: Uuid) -> Result<Option<TaskHistory>> {
        let row = sqlx::query_as::<_, TaskHistory>("SELECT * FROM task_history WHERE task_id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn reconcile_on_restart(&self) -> Result<usize> {
        let result = sqlx::query(
            "UPDATE task_history
             SET status = 'failed', description = 'process restarted', finished_at = now()
             WHERE status IN ('queued', 'running', 'paused')",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }
}
