//! # Danmaku Gateway Tasks
//!
//! C6: the background Task Manager — three priority queues (download,
//! management, fallback), unique-key deduplication, cooperative and
//! administrative cancellation, and durable TaskHistory persistence
//! that survives process restarts.

pub mod manager;
pub mod model;
pub mod repository;

pub use manager::{CancellationFlag, ProgressFn, SubmitTask, TaskFactory, TaskManager, WorkerCounts};
pub use model::{QueueType, TaskHistory, TaskOutcome, TaskStatus};
pub use repository::{InMemoryTaskHistoryRepository, PgTaskHistoryRepository, TaskHistoryRepository};
