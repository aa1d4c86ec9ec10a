// Run Store Port (Interface)

use crate::domain::Run;
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert a new run, assigning the next per-job `sequence` to `run`
    async fn create(&self, run: &mut Run) -> Result<()>;

    /// Persist the run's current state
    async fn update(&self, run: &Run) -> Result<()>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Run>>;

    /// Most recent runs of a job first
    async fn list_for_job(&self, job_id: &str, limit: u32) -> Result<Vec<Run>>;

    /// Latest run of a job, if any
    async fn latest_for_job(&self, job_id: &str) -> Result<Option<Run>> {
        Ok(self.list_for_job(job_id, 1).await?.into_iter().next())
    }

    /// Runs not yet Completed/Failed (startup recovery)
    async fn find_non_terminal(&self) -> Result<Vec<Run>>;

    /// Terminal runs finished at or after `since_millis`, oldest first
    async fn list_terminal_since(&self, since_millis: i64) -> Result<Vec<Run>>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryRunStore {
        runs: Mutex<Vec<Run>>,
    }

    impl InMemoryRunStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Every stored run (test helper)
        pub fn all(&self) -> Vec<Run> {
            self.runs.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RunStore for InMemoryRunStore {
        async fn create(&self, run: &mut Run) -> Result<()> {
            let mut runs = self.runs.lock().unwrap();
            if runs.iter().any(|r| r.id == run.id) {
                return Err(AppError::Conflict(format!("Run {} already exists", run.id)));
            }
            run.sequence = runs
                .iter()
                .filter(|r| r.job_id == run.job_id)
                .map(|r| r.sequence)
                .max()
                .unwrap_or(0)
                + 1;
            runs.push(run.clone());
            Ok(())
        }

        async fn update(&self, run: &Run) -> Result<()> {
            let mut runs = self.runs.lock().unwrap();
            let stored = runs
                .iter_mut()
                .find(|r| r.id == run.id)
                .ok_or_else(|| AppError::NotFound(format!("Run {}", run.id)))?;
            *stored = run.clone();
            Ok(())
        }

        async fn find_by_id(&self, id: &str) -> Result<Option<Run>> {
            Ok(self
                .runs
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.id == id)
                .cloned())
        }

        async fn list_for_job(&self, job_id: &str, limit: u32) -> Result<Vec<Run>> {
            let mut runs: Vec<Run> = self
                .runs
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.job_id == job_id)
                .cloned()
                .collect();
            runs.sort_by(|a, b| b.sequence.cmp(&a.sequence));
            runs.truncate(limit as usize);
            Ok(runs)
        }

        async fn find_non_terminal(&self) -> Result<Vec<Run>> {
            Ok(self
                .runs
                .lock()
                .unwrap()
                .iter()
                .filter(|r| !r.is_terminal())
                .cloned()
                .collect())
        }

        async fn list_terminal_since(&self, since_millis: i64) -> Result<Vec<Run>> {
            let mut runs: Vec<Run> = self
                .runs
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.is_terminal() && r.finished_at.is_some_and(|f| f >= since_millis))
                .cloned()
                .collect();
            runs.sort_by_key(|r| r.finished_at);
            Ok(runs)
        }
    }
}
