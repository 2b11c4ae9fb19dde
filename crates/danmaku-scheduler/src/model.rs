//! The `ScheduledTask` entity and the job-type singleton contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job types that may have at most one active schedule at a time.
pub const SINGLETON_JOB_TYPES: &[&str] = &["incrementalRefresh", "tmdbAutoMap", "webhookProcessor"];

/// Minimum polling interval enforced for `incrementalRefresh`, in hours.
pub const INCREMENTAL_REFRESH_MIN_HOURS: u32 = 3;

pub fn is_singleton_job_type(job_type: &str) -> bool {
    SINGLETON_JOB_TYPES.contains(&job_type)
}

/// A persisted cron-triggered schedule bound to a registered job type.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScheduledTask {
    pub task_id: Uuid,
    pub name: String,
    pub job_type: String,
    pub cron_expression: String,
    pub is_enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
}

impl ScheduledTask {
    pub fn new(name: impl Into<String>, job_type: impl Into<String>, cron_expression: impl Into<String>, is_enabled: bool) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            name: name.into(),
            job_type: job_type.into(),
            cron_expression: cron_expression.into(),
            is_enabled,
            last_run_at: None,
            next_run_at: None,
        }
    }
}
