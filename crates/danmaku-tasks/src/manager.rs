//! The Task Manager (C6): three priority queues with their own worker
//! pools, unique-key deduplication, cooperative cancellation, and a
//! `done_event` per submission so callers (notably the Scheduler) can
//! await true task completion.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use danmaku_core::{GatewayError, Result};
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use uuid::Uuid;

use crate::model::{QueueType, TaskHistory, TaskOutcome, TaskStatus};
use crate::repository::TaskHistoryRepository;

/// Cooperative cancellation flag observed by a running factory between
/// I/O operations. Distinct from `force_fail`, which does not wait for
/// the factory to notice.
#[derive(Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Reports `(percent, description)` back into the owning TaskHistory row.
pub type ProgressFn = Arc<dyn Fn(u8, &str) + Send + Sync>;

type FactoryFuture = Pin<Box<dyn Future<Output = std::result::Result<String, String>> + Send>>;

/// A unit of background work. Returns `Ok(final_description)` on success
/// (the task is marked `completed`) or `Err(reason)` on failure (marked
/// `failed`). Receives a progress reporter and a cancellation flag it
/// should check between I/O operations.
pub type TaskFactory = Box<dyn FnOnce(ProgressFn, CancellationFlag) -> FactoryFuture + Send>;

/// Parameters for [`TaskManager::submit_task`].
pub struct SubmitTask {
    pub factory: TaskFactory,
    pub title: String,
    pub unique_key: Option<String>,
    pub queue_type: QueueType,
    pub task_type: Option<String>,
    pub run_immediately: bool,
    pub scheduled_task_id: Option<Uuid>,
}

struct QueuedJob {
    task_id: Uuid,
    factory: TaskFactory,
}

struct LiveTask {
    cancel: CancellationFlag,
    paused: Arc<AtomicBool>,
    done_tx: Option<oneshot::Sender<TaskOutcome>>,
}

struct QueueHandle {
    sender: mpsc::UnboundedSender<QueuedJob>,
}

/// The task manager. Owns one worker pool per [`QueueType`] and the
/// live cancellation/pause state for every non-terminal task; durable
/// state lives in the injected [`TaskHistoryRepository`].
pub struct TaskManager {
    repo: Arc<dyn TaskHistoryRepository>,
    queues: HashMap<QueueType, QueueHandle>,
    live: Arc<DashMap<Uuid, LiveTask>>,
}

/// Worker-pool sizes per queue. `management` defaults to 1 to serialize
/// mutating operations; the others default to more than one.
#[derive(Debug, Clone, Copy)]
pub struct WorkerCounts {
    pub download: usize,
    pub management: usize,
    pub fallback: usize,
}

impl Default for WorkerCounts {
    fn default() -> Self {
        Self {
            download: 2,
            management: 1,
            fallback: 4,
        }
    }
}

impl TaskManager {
    pub fn new(repo: Arc<dyn TaskHistoryRepository>, workers: WorkerCounts) -> Self {
        let live = Arc::new(DashMap::new());
        let mut queues = HashMap::new();

        for (queue_type, count) in [
            (QueueType::Download, workers.download),
            (QueueType::Management, workers.management),
            (QueueType::Fallback, workers.fallback),
        ] {
            let (tx, rx) = mpsc::unbounded_channel::<QueuedJob>();
            let rx = Arc::new(AsyncMutex::new(rx));
            for _ in 0..count {
                let rx = rx.clone();
                let repo = repo.clone();
                let live = live.clone();
                tokio::spawn(async move {
                    worker_loop(queue_type, rx, repo, live).await;
                });
            }
            queues.insert(queue_type, QueueHandle { sender: tx });
        }

        Self { repo, queues, live }
    }

    /// On process start, reconcile any rows left `queued`/`running`/`paused`
    /// from a previous process to `failed`, since no live state survived.
    pub async fn reconcile_on_restart(&self) -> Result<usize> {
        self.repo.reconcile_on_restart().await
    }

    /// Submit a task. Returns the task id and a `done_event` resolving
    /// once the task reaches a terminal state.
    pub async fn submit_task(&self, spec: SubmitTask) -> Result<(Uuid, oneshot::Receiver<TaskOutcome>)> {
        if let Some(unique_key) = &spec.unique_key {
            if let Some(existing) = self.repo.find_active_by_unique_key(unique_key).await? {
                if spec.run_immediately {
                    tracing::info!(task_id = %existing.task_id, %unique_key, "reusing existing task for run_immediately submission");
                    let (tx, rx) = oneshot::channel();
                    // The existing task may already be running under a
                    // different done_tx; register this one too so this
                    // caller also observes completion.
                    if let Some(mut live) = self.live.get_mut(&existing.task_id) {
                        live.done_tx = Some(tx);
                    } else {
                        // Task finished between the lookup and here.
                        let _ = tx.send(TaskOutcome {
                            task_id: existing.task_id,
                            status: existing.status,
                            description: existing.description.clone(),
                        });
                    }
                    return Ok((existing.task_id, rx));
                }
                return Err(GatewayError::Conflict(unique_key.clone()));
            }
        }

        let row = TaskHistory::new_queued(
            spec.title,
            spec.unique_key,
            spec.queue_type,
            spec.task_type,
            spec.scheduled_task_id,
        );
        self.repo.insert(&row).await?;

        let (done_tx, done_rx) = oneshot::channel();
        self.live.insert(
            row.task_id,
            LiveTask {
                cancel: CancellationFlag::default(),
                paused: Arc::new(AtomicBool::new(false)),
                done_tx: Some(done_tx),
            },
        );

        let queue = self
            .queues
            .get(&spec.queue_type)
            .expect("all queue types are registered in new()");
        queue
            .sender
            .send(QueuedJob {
                task_id: row.task_id,
                factory: spec.factory,
            })
            .map_err(|_| GatewayError::Inconsistent("task queue worker pool is gone".into()))?;

        Ok((row.task_id, done_rx))
    }

    /// Pause a queued or running task. No-op if the task isn't in a
    /// pausable state.
    pub async fn pause_task(&self, task_id: Uuid) -> Result<()> {
        let row = self.get_row(task_id).await?;
        if row.status != TaskStatus::Running && row.status != TaskStatus::Queued {
            return Ok(());
        }
        if let Some(live) = self.live.get(&task_id) {
            live.paused.store(true, Ordering::SeqCst);
        }
        self.set_status(task_id, TaskStatus::Paused, row.description).await
    }

    /// Resume a paused task. No-op if the task isn't paused.
    pub async fn resume_task(&self, task_id: Uuid) -> Result<()> {
        let row = self.get_row(task_id).await?;
        if row.status != TaskStatus::Paused {
            return Ok(());
        }
        if let Some(live) = self.live.get(&task_id) {
            live.paused.store(false, Ordering::SeqCst);
        }
        self.set_status(task_id, TaskStatus::Running, row.description).await
    }

    /// Signal cooperative cancellation. The factory must observe
    /// [`CancellationFlag::is_cancelled`] and unwind on its own.
    pub fn abort_current_task(&self, task_id: Uuid) {
        if let Some(live) = self.live.get(&task_id) {
            live.cancel.cancel();
        }
    }

    /// Administrative override: transition straight to `failed`
    /// without waiting for the factory to cooperate.
    pub async fn force_fail_task(&self, task_id: Uuid) -> Result<()> {
        let row = self.get_row(task_id).await?;
        if row.status.is_terminal() {
            return Ok(());
        }
        if let Some(live) = self.live.get(&task_id) {
            live.cancel.cancel();
        }
        self.finish(task_id, TaskStatus::Failed, "force failed by administrator".to_string())
            .await
    }

    /// Remove a still-queued task without running it.
    pub async fn cancel_pending_task(&self, task_id: Uuid) -> Result<()> {
        let row = self.get_row(task_id).await?;
        if row.status != TaskStatus::Queued {
            return Ok(());
        }
        if let Some(live) = self.live.get(&task_id) {
            live.cancel.cancel();
        }
        self.finish(task_id, TaskStatus::Failed, "cancelled before running".to_string())
            .await
    }

    async fn get_row(&self, task_id: Uuid) -> Result<TaskHistory> {
        self.repo
            .get(task_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("task {task_id}")))
    }

    async fn set_status(&self, task_id: Uuid, status: TaskStatus, description: String) -> Result<()> {
        let mut row = self.get_row(task_id).await?;
        row.status = status;
        row.description = description;
        self.repo.update(&row).await
    }

    async fn finish(&self, task_id: Uuid, status: TaskStatus, description: String) -> Result<()> {
        let mut row = self.get_row(task_id).await?;
        row.status = status;
        row.description = description.clone();
        row.finished_at = Some(Utc::now());
        self.repo.update(&row).await?;

        if let Some((_, mut live)) = self.live.remove(&task_id) {
            if let Some(tx) = live.done_tx.take() {
                let _ = tx.send(TaskOutcome {
                    task_id,
                    status,
                    description,
                });
            }
        }
        Ok(())
    }
}

async fn worker_loop(
    queue_type: QueueType,
    rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<QueuedJob>>>,
    repo: Arc<dyn TaskHistoryRepository>,
    live: Arc<DashMap<Uuid, LiveTask>>,
) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            break;
        };

        // The task may have been cancelled or force-failed before a
        // worker picked it up; skip running it in that case.
        let Some(live_entry) = live.get(&job.task_id) else {
            continue;
        };
        if live_entry.cancel.is_cancelled() {
            continue;
        }
        let cancel = live_entry.cancel.clone();
        drop(live_entry);

        let mut row = match repo.get(job.task_id).await {
            Ok(Some(row)) => row,
            _ => continue,
        };
        row.status = TaskStatus::Running;
        if repo.update(&row).await.is_err() {
            continue;
        }

        let repo_for_progress = repo.clone();
        let progress_task_id = job.task_id;
        let progress: ProgressFn = Arc::new(move |percent, description| {
            let repo = repo_for_progress.clone();
            let description = description.to_string();
            tokio::spawn(async move {
                if let Ok(Some(mut row)) = repo.get(progress_task_id).await {
                    row.progress = percent.min(100) as i16;
                    row.description = description;
                    let _ = repo.update(&row).await;
                }
            });
        });

        tracing::debug!(task_id = %job.task_id, ?queue_type, "running task");
        let outcome = (job.factory)(progress, cancel).await;

        let (status, description) = match outcome {
            Ok(description) => (TaskStatus::Completed, description),
            Err(description) => (TaskStatus::Failed, description),
        };

        row.status = status;
        row.description = description.clone();
        row.finished_at = Some(Utc::now());
        let _ = repo.update(&row).await;

        if let Some((_, mut live_task)) = live.remove(&job.task_id) {
            if let Some(tx) = live_task.done_tx.take() {
                let _ = tx.send(TaskOutcome {
                    task_id: job.task_id,
                    status,
                    description,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryTaskHistoryRepository;

    fn immediate_success(message: &'static str) -> TaskFactory {
        Box::new(move |_progress, _cancel| Box::pin(async move { Ok(message.to_string()) }))
    }

    fn cooperative_cancel_check() -> TaskFactory {
        Box::new(|_progress, cancel| {
            Box::pin(async move {
                for _ in 0..50 {
                    if cancel.is_cancelled() {
                        return Err("cancelled".to_string());
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                }
                Ok("finished without cancellation".to_string())
            })
        })
    }

    #[tokio::test]
    async fn submit_and_await_completion() {
        let repo = Arc::new(InMemoryTaskHistoryRepository::new());
        let manager = TaskManager::new(repo, WorkerCounts::default());

        let (task_id, done) = manager
            .submit_task(SubmitTask {
                factory: immediate_success("done"),
                title: "test".into(),
                unique_key: None,
                queue_type: QueueType::Download,
                task_type: None,
                run_immediately: false,
                scheduled_task_id: None,
            })
            .await
            .unwrap();

        let outcome = done.await.unwrap();
        assert_eq!(outcome.task_id, task_id);
        assert_eq!(outcome.status, TaskStatus::Completed);
        assert_eq!(outcome.description, "done");
    }

    #[tokio::test]
    async fn duplicate_unique_key_conflicts_without_run_immediately() {
        let repo = Arc::new(InMemoryTaskHistoryRepository::new());
        let manager = TaskManager::new(repo, WorkerCounts { management: 1, download: 0, fallback: 0 });

        let (_task_id, _done) = manager
            .submit_task(SubmitTask {
                factory: cooperative_cancel_check(),
                title: "first".into(),
                unique_key: Some("delete-anime-42".into()),
                queue_type: QueueType::Management,
                task_type: None,
                run_immediately: false,
                scheduled_task_id: None,
            })
            .await
            .unwrap();

        let second = manager
            .submit_task(SubmitTask {
                factory: immediate_success("second"),
                title: "second".into(),
                unique_key: Some("delete-anime-42".into()),
                queue_type: QueueType::Management,
                task_type: None,
                run_immediately: false,
                scheduled_task_id: None,
            })
            .await;

        assert!(matches!(second, Err(GatewayError::Conflict(_))));
    }

    #[tokio::test]
    async fn run_immediately_returns_existing_task() {
        let repo = Arc::new(InMemoryTaskHistoryRepository::new());
        let manager = TaskManager::new(repo, WorkerCounts { management: 1, download: 0, fallback: 0 });

        let (first_id, _done) = manager
            .submit_task(SubmitTask {
                factory: cooperative_cancel_check(),
                title: "first".into(),
                unique_key: Some("k".into()),
                queue_type: QueueType::Management,
                task_type: None,
                run_immediately: false,
                scheduled_task_id: None,
            })
            .await
            .unwrap();

        let (second_id, _done2) = manager
            .submit_task(SubmitTask {
                factory: immediate_success("ignored"),
                title: "second".into(),
                unique_key: Some("k".into()),
                queue_type: QueueType::Management,
                task_type: None,
                run_immediately: true,
                scheduled_task_id: None,
            })
            .await
            .unwrap();

        assert_eq!(first_id, second_id);
        manager.abort_current_task(first_id);
    }

    #[tokio::test]
    async fn abort_is_observed_cooperatively() {
        let repo = Arc::new(InMemoryTaskHistoryRepository::new());
        let manager = TaskManager::new(repo, WorkerCounts { management: 1, download: 0, fallback: 0 });

        let (task_id, done) = manager
            .submit_task(SubmitTask {
                factory: cooperative_cancel_check(),
                title: "test".into(),
                unique_key: None,
                queue_type: QueueType::Management,
                task_type: None,
                run_immediately: false,
                scheduled_task_id: None,
            })
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        manager.abort_current_task(task_id);

        let outcome = done.await.unwrap();
        assert_eq!(outcome.status, TaskStatus::Failed);
        assert_eq!(outcome.description, "cancelled");
    }

    #[tokio::test]
    async fn force_fail_does_not_wait_for_cooperation() {
        let repo = Arc::new(InMemoryTaskHistoryRepository::new());
        let manager = Arc::new(TaskManager::new(repo, WorkerCounts { management: 1, download: 0, fallback: 0 }));

        // A factory that never checks cancellation and never finishes
        // on its own within the test's lifetime.
        let factory: TaskFactory = Box::new(|_progress, _cancel| {
            Box::pin(async move {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                Ok("never".to_string())
            })
        });

        let (task_id, done) = manager
            .submit_task(SubmitTask {
                factory,
                title: "stuck".into(),
                unique_key: None,
                queue_type: QueueType::Management,
                task_type: None,
                run_immediately: false,
                scheduled_task_id: None,
            })
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        manager.force_fail_task(task_id).await.unwrap();

        let outcome = done.await.unwrap();
        assert_eq!(outcome.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn cancel_pending_removes_before_it_ever_runs() {
        let repo = Arc::new(InMemoryTaskHistoryRepository::new());
        // Zero management workers: nothing will ever drain the queue.
        let manager = TaskManager::new(repo, WorkerCounts { management: 0, download: 0, fallback: 0 });

        let (task_id, done) = manager
            .submit_task(SubmitTask {
                factory: immediate_success("should never run"),
                title: "pending".into(),
                unique_key: None,
                queue_type: QueueType::Management,
                task_type: None,
                run_immediately: false,
                scheduled_task_id: None,
            })
            .await
            .unwrap();

        manager.cancel_pending_task(task_id).await.unwrap();
        let outcome = done.await.unwrap();
        assert_eq!(outcome.status, TaskStatus::Failed);
        assert_eq!(outcome.description, "cancelled before running");
    }

    #[tokio::test]
    async fn restart_reconciliation_fails_in_flight_rows() {
        let repo = Arc::new(InMemoryTaskHistoryRepository::new());
        let row = TaskHistory::new_queued("orphan", None, QueueType::Download, None, None);
        repo.insert(&row).await.unwrap();

        let manager = TaskManager::new(repo.clone(), WorkerCounts { management: 0, download: 0, fallback: 0 });
        let reconciled = manager.reconcile_on_restart().await.unwrap();
        assert_eq!(reconciled, 1);

        let updated = repo.get(row.task_id).await.unwrap().unwrap();
        assert_eq!(updated.status, TaskStatus::Failed);
        assert_eq!(updated.description, "process restarted");
    }
}
