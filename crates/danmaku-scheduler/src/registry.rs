//! Static registration of job types the scheduler can run.
//!
//! Job implementations are registered explicitly at startup rather than
//! discovered by scanning a directory: a job is just a [`TaskFactory`]
//! builder keyed by `job_type`, the same shape as the adapter and
//! metadata-source registries.

use std::sync::Arc;

use danmaku_core::{GatewayError, Result};
use danmaku_tasks::TaskFactory;
use parking_lot::RwLock;

/// Something the scheduler can run on a cron schedule.
pub trait ScheduledJob: Send + Sync {
    /// Stable identifier matched against `ScheduledTask::job_type`.
    fn job_type(&self) -> &str;

    /// Human-readable name surfaced in the available-jobs listing.
    fn job_name(&self) -> &str;

    /// Build a fresh [`TaskFactory`] for one firing of this job.
    fn build_task(&self) -> TaskFactory;
}

/// Describes a registered job for discovery/listing purposes.
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    pub job_type: String,
    pub job_name: String,
}

#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<Vec<Arc<dyn ScheduledJob>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, job: Arc<dyn ScheduledJob>) {
        let mut jobs = self.jobs.write();
        jobs.retain(|j| j.job_type() != job.job_type());
        jobs.push(job);
    }

    pub fn get(&self, job_type: &str) -> Result<Arc<dyn ScheduledJob>> {
        self.jobs
            .read()
            .iter()
            .find(|j| j.job_type() == job_type)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("job type {job_type}")))
    }

    pub fn is_registered(&self, job_type: &str) -> bool {
        self.jobs.read().iter().any(|j| j.job_type() == job_type)
    }

    pub fn available_jobs(&self) -> Vec<JobDescriptor> {
        self.jobs
            .read()
            .iter()
            .map(|j| JobDescriptor {
                job_type: j.job_type().to_string(),
                job_name: j.job_name().to_string(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubJob {
        job_type: &'static str,
        job_name: &'static str,
    }

    impl ScheduledJob for StubJob {
        fn job_type(&self) -> &str {
            self.job_type
        }

        fn job_name(&self) -> &str {
            self.job_name
        }

        fn build_task(&self) -> TaskFactory {
            Box::new(|_progress, _cancel| Box::pin(async move { Ok("ok".to_string()) }))
        }
    }

    #[test]
    fn register_and_lookup_by_job_type() {
        let registry = JobRegistry::new();
        registry.register(Arc::new(StubJob {
            job_type: "incrementalRefresh",
            job_name: "Incremental Refresh",
        }));

        assert!(registry.is_registered("incrementalRefresh"));
        assert!(registry.get("tmdbAutoMap").is_err());
    }

    #[test]
    fn re_registering_the_same_job_type_replaces_it() {
        let registry = JobRegistry::new();
        registry.register(Arc::new(StubJob {
            job_type: "webhookProcessor",
            job_name: "first",
        }));
        registry.register(Arc::new(StubJob {
            job_type: "webhookProcessor",
            job_name: "second",
        }));

        let jobs = registry.available_jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_name, "second");
    }
}
