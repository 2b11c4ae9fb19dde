//! The Scheduler (C7): cron-triggered jobs that run through the shared
//! [`TaskManager`] so every firing gets the same durable history,
//! dedup, and cancellation semantics as any other background task.

use std::sync::Arc;

use chrono::Utc;
use danmaku_core::{GatewayError, Result};
use danmaku_tasks::{QueueType, SubmitTask, TaskManager};
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use crate::cron::cron_is_valid;
use crate::model::{is_singleton_job_type, ScheduledTask, INCREMENTAL_REFRESH_MIN_HOURS};
use crate::registry::{JobDescriptor, JobRegistry};
use crate::repository::ScheduledTaskRepository;

/// Owns the underlying cron engine plus the job registry and durable
/// schedule rows. A `ScheduledTask` row is only data until it's handed
/// to the cron engine via [`Scheduler::start`]/[`Scheduler::add_task`];
/// the cron engine is the thing that actually fires.
pub struct Scheduler {
    repo: Arc<dyn ScheduledTaskRepository>,
    jobs: Arc<JobRegistry>,
    task_manager: Arc<TaskManager>,
    engine: tokio::sync::Mutex<JobScheduler>,
}

impl Scheduler {
    pub async fn new(
        repo: Arc<dyn ScheduledTaskRepository>,
        jobs: Arc<JobRegistry>,
        task_manager: Arc<TaskManager>,
    ) -> Result<Self> {
        let engine = JobScheduler::new()
            .await
            .map_err(|e| GatewayError::Fatal(format!("failed to start cron engine: {e}")))?;
        Ok(Self {
            repo,
            jobs,
            task_manager,
            engine: tokio::sync::Mutex::new(engine),
        })
    }

    /// Start the cron engine and schedule every enabled row already in
    /// the repository. Call once at process startup.
    pub async fn start(&self) -> Result<()> {
        for task in self.repo.list_all().await? {
            if task.is_enabled {
                self.schedule(&task).await?;
            }
        }
        self.engine
            .lock()
            .await
            .start()
            .await
            .map_err(|e| GatewayError::Fatal(format!("failed to start cron engine: {e}")))
    }

    /// Register a new cron schedule for an already-registered job type.
    pub async fn add_task(&self, task: ScheduledTask) -> Result<ScheduledTask> {
        self.validate(&task).await?;
        self.repo.insert(&task).await?;
        if task.is_enabled {
            self.schedule(&task).await?;
        }
        Ok(task)
    }

    /// Replace an existing schedule's cron expression / enabled state.
    /// Re-adds the underlying cron job so the new expression takes effect.
    pub async fn update_task(&self, task: ScheduledTask) -> Result<ScheduledTask> {
        let existing = self
            .repo
            .get(task.task_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("scheduled task {}", task.task_id)))?;
        if existing.job_type != task.job_type {
            return Err(GatewayError::InputInvalid(
                "job_type cannot be changed on an existing schedule".into(),
            ));
        }
        self.validate(&task).await?;
        self.repo.update(&task).await?;
        if task.is_enabled {
            self.schedule(&task).await?;
        }
        Ok(task)
    }

    pub async fn delete_task(&self, task_id: Uuid) -> Result<()> {
        self.repo.delete(task_id).await
    }

    /// Fire a job immediately, bypassing its cron schedule.
    pub async fn run_task_now(&self, task_id: Uuid) -> Result<()> {
        let task = self
            .repo
            .get(task_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("scheduled task {task_id}")))?;
        self.fire(&task).await
    }

    /// Fire the schedule bound to a job type, if one is registered.
    pub async fn run_task_now_by_type(&self, job_type: &str) -> Result<()> {
        let task = self
            .repo
            .get_by_job_type(job_type)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("schedule for job type {job_type}")))?;
        self.fire(&task).await
    }

    pub fn get_available_jobs(&self) -> Vec<JobDescriptor> {
        self.jobs.available_jobs()
    }

    async fn validate(&self, task: &ScheduledTask) -> Result<()> {
        if !self.jobs.is_registered(&task.job_type) {
            return Err(GatewayError::InputInvalid(format!(
                "unknown job type {}",
                task.job_type
            )));
        }
        if task.job_type == "incrementalRefresh" && !cron_is_valid(&task.cron_expression, INCREMENTAL_REFRESH_MIN_HOURS) {
            return Err(GatewayError::InputInvalid(format!(
                "incrementalRefresh must not run more often than every {INCREMENTAL_REFRESH_MIN_HOURS} hours"
            )));
        }
        if is_singleton_job_type(&task.job_type) {
            if let Some(other) = self.repo.get_by_job_type(&task.job_type).await? {
                if other.task_id != task.task_id {
                    return Err(GatewayError::Conflict(format!(
                        "job type {} already has a schedule",
                        task.job_type
                    )));
                }
            }
        }
        Ok(())
    }

    /// Register a job's cron expression with the underlying engine. The
    /// closure captures just enough to call back into `fire` through a
    /// cloned `Arc` would require `Scheduler` to be self-referential, so
    /// instead the closure re-reads the row from the repository by id
    /// on every firing, guaranteeing it always runs the latest
    /// cron/enabled state rather than a snapshot taken at registration.
    async fn schedule(&self, task: &ScheduledTask) -> Result<()> {
        let repo = self.repo.clone();
        let jobs = self.jobs.clone();
        let task_manager = self.task_manager.clone();
        let task_id = task.task_id;

        let job = Job::new_async(task.cron_expression.as_str(), move |_uuid, _lock| {
            let repo = repo.clone();
            let jobs = jobs.clone();
            let task_manager = task_manager.clone();
            Box::pin(async move {
                let scheduled_at = Utc::now();
                let Ok(Some(row)) = repo.get(task_id).await else {
                    return;
                };
                if !row.is_enabled {
                    return;
                }
                let Ok(job_impl) = jobs.get(&row.job_type) else {
                    tracing::warn!(job_type = %row.job_type, "scheduled row references an unregistered job type");
                    return;
                };

                let factory = job_impl.build_task();
                let submit = SubmitTask {
                    factory,
                    title: row.name.clone(),
                    unique_key: if is_singleton_job_type(&row.job_type) {
                        Some(format!("scheduled-job-{}", row.job_type))
                    } else {
                        None
                    },
                    queue_type: QueueType::Management,
                    task_type: Some(row.job_type.clone()),
                    run_immediately: false,
                    scheduled_task_id: Some(task_id),
                };

                if let Err(err) = task_manager.submit_task(submit).await {
                    tracing::warn!(%err, job_type = %row.job_type, "failed to submit scheduled job");
                    return;
                }

                // last_run_at tracks the cron firing time, not wall-clock
                // completion, matching the upstream event-driven scheduler.
                let _ = repo.update_run_times(task_id, Some(scheduled_at), None).await;
            })
        })
        .map_err(|e| GatewayError::Fatal(format!("invalid cron expression: {e}")))?;

        self.engine
            .lock()
            .await
            .add(job)
            .await
            .map_err(|e| GatewayError::Fatal(format!("failed to register cron job: {e}")))?;
        Ok(())
    }

    async fn fire(&self, task: &ScheduledTask) -> Result<()> {
        let job_impl = self.jobs.get(&task.job_type)?;
        let factory = job_impl.build_task();
        let submit = SubmitTask {
            factory,
            title: task.name.clone(),
            unique_key: if is_singleton_job_type(&task.job_type) {
                Some(format!("scheduled-job-{}", task.job_type))
            } else {
                None
            },
            queue_type: QueueType::Management,
            task_type: Some(task.job_type.clone()),
            run_immediately: true,
            scheduled_task_id: Some(task.task_id),
        };
        self.task_manager.submit_task(submit).await?;
        self.repo
            .update_run_times(task.task_id, Some(Utc::now()), None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ScheduledJob;
    use crate::repository::InMemoryScheduledTaskRepository;
    use danmaku_tasks::{InMemoryTaskHistoryRepository, TaskFactory, WorkerCounts};

    struct NoopJob;

    impl ScheduledJob for NoopJob {
        fn job_type(&self) -> &str {
            "incrementalRefresh"
        }

        fn job_name(&self) -> &str {
            "Incremental Refresh"
        }

        fn build_task(&self) -> TaskFactory {
            Box::new(|_progress, _cancel| Box::pin(async move { Ok("refreshed".to_string()) }))
        }
    }

    async fn make_scheduler() -> (Scheduler, Arc<InMemoryScheduledTaskRepository>) {
        let repo = Arc::new(InMemoryScheduledTaskRepository::new());
        let jobs = Arc::new(JobRegistry::new());
        jobs.register(Arc::new(NoopJob));
        let task_manager = Arc::new(TaskManager::new(
            Arc::new(InMemoryTaskHistoryRepository::new()),
            WorkerCounts::default(),
        ));
        let scheduler = Scheduler::new(repo.clone(), jobs, task_manager).await.unwrap();
        (scheduler, repo)
    }

    #[tokio::test]
    async fn rejects_unknown_job_type() {
        let (scheduler, _repo) = make_scheduler().await;
        let task = ScheduledTask::new("x", "notRegistered", "0 */6 * * *", true);
        assert!(scheduler.add_task(task).await.is_err());
    }

    #[tokio::test]
    async fn rejects_incremental_refresh_below_minimum_interval() {
        let (scheduler, _repo) = make_scheduler().await;
        let task = ScheduledTask::new("x", "incrementalRefresh", "0 * * * *", true);
        assert!(scheduler.add_task(task).await.is_err());
    }

    #[tokio::test]
    async fn accepts_incremental_refresh_at_minimum_interval() {
        let (scheduler, _repo) = make_scheduler().await;
        let task = ScheduledTask::new("x", "incrementalRefresh", "0 */3 * * *", true);
        assert!(scheduler.add_task(task).await.is_ok());
    }

    #[tokio::test]
    async fn second_schedule_for_a_singleton_job_type_conflicts() {
        let (scheduler, _repo) = make_scheduler().await;
        let first = ScheduledTask::new("first", "incrementalRefresh", "0 */3 * * *", true);
        scheduler.add_task(first).await.unwrap();

        let second = ScheduledTask::new("second", "incrementalRefresh", "0 */4 * * *", true);
        assert!(matches!(scheduler.add_task(second).await, Err(GatewayError::Conflict(_))));
    }

    #[tokio::test]
    async fn run_task_now_submits_through_task_manager() {
        let (scheduler, repo) = make_scheduler().await;
        let task = ScheduledTask::new("x", "incrementalRefresh", "0 */3 * * *", true);
        let task = scheduler.add_task(task).await.unwrap();

        scheduler.run_task_now(task.task_id).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let updated = repo.get(task.task_id).await.unwrap().unwrap();
        assert!(updated.last_run_at.is_some());
    }

    #[tokio::test]
    async fn available_jobs_reflects_registered_job_types() {
        let (scheduler, _repo) = make_scheduler().await;
        let available = scheduler.get_available_jobs();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].job_type, "incrementalRefresh");
    }
}
