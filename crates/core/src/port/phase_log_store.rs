// Phase Log Store Port (append-only)

use crate::domain::{Phase, PhaseLogEntry};
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait PhaseLogStore: Send + Sync {
    /// Append an entry; returns the assigned `seq`
    async fn append(&self, entry: &PhaseLogEntry) -> Result<i64>;

    /// All entries of a run in append order
    async fn list_for_run(&self, run_id: &str) -> Result<Vec<PhaseLogEntry>>;

    /// Most recent entry of a job for one phase
    async fn latest_for_job(&self, job_id: &str, phase: Phase) -> Result<Option<PhaseLogEntry>>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryPhaseLogStore {
        entries: Mutex<Vec<PhaseLogEntry>>,
    }

    impl InMemoryPhaseLogStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Every appended entry (test helper)
        pub fn all(&self) -> Vec<PhaseLogEntry> {
            self.entries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PhaseLogStore for InMemoryPhaseLogStore {
        async fn append(&self, entry: &PhaseLogEntry) -> Result<i64> {
            let mut entries = self.entries.lock().unwrap();
            let seq = entries.len() as i64 + 1;
            let mut stored = entry.clone();
            stored.seq = seq;
            entries.push(stored);
            Ok(seq)
        }

        async fn list_for_run(&self, run_id: &str) -> Result<Vec<PhaseLogEntry>> {
            Ok(self
                .entries
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.run_id == run_id)
                .cloned()
                .collect())
        }

        async fn latest_for_job(
            &self,
            job_id: &str,
            phase: Phase,
        ) -> Result<Option<PhaseLogEntry>> {
            Ok(self
                .entries
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|e| e.job_id == job_id && e.phase == phase)
                .cloned())
        }
    }
}
