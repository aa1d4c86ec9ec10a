// Job Registry Port (Interface)

use crate::domain::{Job, JobId};
use crate::error::Result;
use async_trait::async_trait;

/// Durable store of job definitions and their last known state
#[async_trait]
pub trait JobRegistry: Send + Sync {
    /// Insert a new job
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Find job by ID
    async fn find_by_id(&self, id: &str) -> Result<Option<Job>>;

    /// All jobs, oldest first
    async fn list(&self) -> Result<Vec<Job>>;

    /// Active jobs that carry at least one schedule
    async fn list_scheduled(&self) -> Result<Vec<Job>>;

    /// Overwrite configuration fields (name, topology, policy, options) and
    /// `last_artifact_ref`, which a topology change may clear.
    ///
    /// # Errors
    /// - `AppError::NotFound` if the job does not exist
    /// - `AppError::Conflict` if a run is in flight
    async fn update_config(&self, job: &Job) -> Result<()>;

    /// Overwrite state fields only (status, counters, last_* columns)
    async fn save_state(&self, job: &Job) -> Result<()>;

    /// Delete a job with its runs and phase logs.
    ///
    /// # Errors
    /// - `AppError::NotFound` if the job does not exist
    /// - `AppError::Conflict` if a run is in flight
    async fn delete(&self, id: &str) -> Result<()>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory registry with the same conflict rules as the SQLite adapter
    #[derive(Default)]
    pub struct InMemoryJobRegistry {
        jobs: Mutex<HashMap<JobId, Job>>,
    }

    impl InMemoryJobRegistry {
        pub fn new() -> Self {
            Self::default()
        }

        /// Snapshot of a stored job (test helper)
        pub fn get(&self, id: &str) -> Option<Job> {
            self.jobs.lock().unwrap().get(id).cloned()
        }
    }

    #[async_trait]
    impl JobRegistry for InMemoryJobRegistry {
        async fn insert(&self, job: &Job) -> Result<()> {
            let mut jobs = self.jobs.lock().unwrap();
            if jobs.contains_key(&job.id) {
                return Err(AppError::Conflict(format!("Job {} already exists", job.id)));
            }
            jobs.insert(job.id.clone(), job.clone());
            Ok(())
        }

        async fn find_by_id(&self, id: &str) -> Result<Option<Job>> {
            Ok(self.jobs.lock().unwrap().get(id).cloned())
        }

        async fn list(&self) -> Result<Vec<Job>> {
            let mut jobs: Vec<Job> = self.jobs.lock().unwrap().values().cloned().collect();
            jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            Ok(jobs)
        }

        async fn list_scheduled(&self) -> Result<Vec<Job>> {
            Ok(self
                .list()
                .await?
                .into_iter()
                .filter(|j| j.is_active && (j.schedule.is_some() || j.backup_schedule.is_some()))
                .collect())
        }

        async fn update_config(&self, job: &Job) -> Result<()> {
            let mut jobs = self.jobs.lock().unwrap();
            let stored = jobs
                .get_mut(&job.id)
                .ok_or_else(|| AppError::NotFound(format!("Job {}", job.id)))?;
            if stored.has_run_in_flight() {
                return Err(AppError::Conflict(format!(
                    "Job {} has a run in flight",
                    job.id
                )));
            }
            stored.name = job.name.clone();
            stored.source_host_ref = job.source_host_ref.clone();
            stored.intermediary_host_ref = job.intermediary_host_ref.clone();
            stored.destination_host_ref = job.destination_host_ref.clone();
            stored.workload_id = job.workload_id;
            stored.workload_kind = job.workload_kind;
            stored.options = job.options.clone();
            stored.is_active = job.is_active;
            stored.schedule = job.schedule.clone();
            stored.backup_schedule = job.backup_schedule.clone();
            stored.max_retries = job.max_retries;
            stored.retry_delay_minutes = job.retry_delay_minutes;
            stored.notify_on_each_run = job.notify_on_each_run;
            stored.last_artifact_ref = job.last_artifact_ref.clone();
            stored.updated_at = job.updated_at;
            Ok(())
        }

        async fn save_state(&self, job: &Job) -> Result<()> {
            let mut jobs = self.jobs.lock().unwrap();
            let stored = jobs
                .get_mut(&job.id)
                .ok_or_else(|| AppError::NotFound(format!("Job {}", job.id)))?;
            stored.current_status = job.current_status;
            stored.last_failure = job.last_failure;
            stored.last_error = job.last_error.clone();
            stored.last_run_started_at = job.last_run_started_at;
            stored.last_run_finished_at = job.last_run_finished_at;
            stored.last_artifact_ref = job.last_artifact_ref.clone();
            stored.last_backup_at = job.last_backup_at;
            stored.last_restore_at = job.last_restore_at;
            stored.last_duration_ms = job.last_duration_ms;
            stored.consecutive_failure_count = job.consecutive_failure_count;
            stored.run_count = job.run_count;
            stored.error_count = job.error_count;
            stored.updated_at = job.updated_at;
            Ok(())
        }

        async fn delete(&self, id: &str) -> Result<()> {
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.get(id) {
                None => Err(AppError::NotFound(format!("Job {}", id))),
                Some(job) if job.has_run_in_flight() => Err(AppError::Conflict(format!(
                    "Job {} has a run in flight",
                    id
                ))),
                Some(_) => {
                    jobs.remove(id);
                    Ok(())
                }
            }
        }
    }
}
