//! # Danmaku Gateway Scheduler
//!
//! C7: cron-triggered job scheduling on top of the Task Manager —
//! singleton job-type enforcement, a minimum-interval guard for the
//! incremental refresh job, and static registration of runnable job
//! types in place of dynamic module discovery.

pub mod cron;
pub mod model;
pub mod registry;
pub mod repository;
pub mod scheduler;

pub use cron::cron_is_valid;
pub use model::{is_singleton_job_type, ScheduledTask, INCREMENTAL_REFRESH_MIN_HOURS, SINGLETON_JOB_TYPES};
pub use registry::{JobDescriptor, JobRegistry, ScheduledJob};
pub use repository::{InMemoryScheduledTaskRepository, PgScheduledTaskRepository, ScheduledTaskRepository};
pub use scheduler::Scheduler;
