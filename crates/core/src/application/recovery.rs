// Startup recovery - runs left non-terminal by a previous process
use crate::domain::{FailureReason, Job, Phase, PhaseLogEntry, PhaseStatus, Run};
use crate::error::Result;
use crate::port::{JobRegistry, LeaseStore, PhaseLogStore, RunStore, TimeProvider};
use std::sync::Arc;
use tracing::{info, warn};

const INTERRUPTED_MESSAGE: &str = "run interrupted by process restart; re-trigger to run again";
const ORPHANED_MESSAGE: &str = "run lease expired without a live owner; re-trigger to run again";

/// Crash recovery service
///
/// On daemon startup, every run found in a non-terminal state is marked
/// `Failed(Interrupted)`. Remote side effects are not assumed idempotent, so
/// nothing is resumed. Runs of another owner whose lease is still live are
/// left to the periodic orphan sweep, which fails them once the lease lapses.
pub struct RecoveryService {
    registry: Arc<dyn JobRegistry>,
    runs: Arc<dyn RunStore>,
    phase_log: Arc<dyn PhaseLogStore>,
    leases: Arc<dyn LeaseStore>,
    time_provider: Arc<dyn TimeProvider>,
    owner_id: String,
}

impl RecoveryService {
    /// Create a new recovery service
    ///
    /// `owner_id` is this process's lease owner token; runs whose lease is
    /// still live under another owner are left alone.
    pub fn new(
        registry: Arc<dyn JobRegistry>,
        runs: Arc<dyn RunStore>,
        phase_log: Arc<dyn PhaseLogStore>,
        leases: Arc<dyn LeaseStore>,
        time_provider: Arc<dyn TimeProvider>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            runs,
            phase_log,
            leases,
            time_provider,
            owner_id: owner_id.into(),
        }
    }

    /// Mark interrupted runs failed and release their leases
    ///
    /// # Returns
    /// Number of runs recovered
    pub async fn recover_interrupted_runs(&self) -> Result<usize> {
        let now = self.time_provider.now_millis();
        let open_runs = self.runs.find_non_terminal().await?;
        info!(candidates = %open_runs.len(), "Starting interrupted run recovery");

        let mut recovered = 0;
        for mut run in open_runs {
            if let Some(lease) = self.leases.find(&run.job_id).await? {
                if lease.run_id == run.id
                    && !lease.is_expired(now)
                    && lease.verify_owner(&self.owner_id).is_err()
                {
                    info!(
                        job_id = %run.job_id,
                        run_id = %run.id,
                        owner = %lease.owner,
                        "Run still leased by another live process, leaving it"
                    );
                    continue;
                }
            }

            self.recover_single_run(&mut run, now, INTERRUPTED_MESSAGE).await?;
            recovered += 1;
        }

        recovered += self.reset_stale_jobs(now).await?;

        info!(recovered_count = %recovered, "Interrupted run recovery complete");
        Ok(recovered)
    }

    /// Fail non-terminal runs whose lease has expired or is gone.
    ///
    /// `is_local` reports runs executing in this process; those are left to
    /// their own task.
    pub async fn recover_orphaned_runs(&self, is_local: impl Fn(&str) -> bool) -> Result<usize> {
        let now = self.time_provider.now_millis();
        let mut recovered = 0;

        for run in self.runs.find_non_terminal().await? {
            if is_local(&run.id) {
                continue;
            }
            if let Some(lease) = self.leases.find(&run.job_id).await? {
                if lease.run_id == run.id && !lease.is_expired(now) {
                    continue;
                }
            }
            // The run may have finished since the listing
            let Some(mut run) = self.runs.find_by_id(&run.id).await? else {
                continue;
            };
            if run.is_terminal() {
                continue;
            }

            self.recover_single_run(&mut run, now, ORPHANED_MESSAGE).await?;
            recovered += 1;
        }

        if recovered > 0 {
            info!(recovered_count = %recovered, "Orphaned runs recovered");
        }
        Ok(recovered)
    }

    async fn recover_single_run(&self, run: &mut Run, now: i64, message: &str) -> Result<()> {
        warn!(
            job_id = %run.job_id,
            run_id = %run.id,
            status = %run.status,
            attempt = %run.attempt,
            "Marking interrupted run as failed"
        );

        run.fail(FailureReason::Interrupted, message, now)?;
        let summary = PhaseLogEntry::new(
            run.id.clone(),
            run.job_id.clone(),
            run.attempt,
            Phase::Completion,
            PhaseStatus::Failed,
            run.started_at.unwrap_or(run.created_at),
            now,
            format!("{} run interrupted after {} attempt(s)", run.requested_mode, run.attempt),
        )
        .with_error(message)
        .with_failure(FailureReason::Interrupted);
        self.phase_log.append(&summary).await?;
        self.runs.update(run).await?;

        if let Some(mut job) = self.registry.find_by_id(&run.job_id).await? {
            self.mark_job_interrupted(&mut job, now, run.total_duration_ms(now), message)
                .await?;
        }

        let released = self.leases.release_for_run(&run.id).await?;
        if released > 0 {
            info!(job_id = %run.job_id, run_id = %run.id, "Released lease of interrupted run");
        }
        Ok(())
    }

    /// Jobs showing an in-flight status without any open run
    async fn reset_stale_jobs(&self, now: i64) -> Result<usize> {
        let mut reset = 0;
        for mut job in self.registry.list().await? {
            if !job.has_run_in_flight() {
                continue;
            }
            let open = self
                .runs
                .latest_for_job(&job.id)
                .await?
                .is_some_and(|r| !r.is_terminal());
            if open {
                continue;
            }

            warn!(job_id = %job.id, status = %job.current_status, "Job status in flight without an open run, resetting");
            self.mark_job_interrupted(&mut job, now, 0, INTERRUPTED_MESSAGE)
                .await?;
            reset += 1;
        }
        Ok(reset)
    }

    async fn mark_job_interrupted(
        &self,
        job: &mut Job,
        now: i64,
        duration_ms: i64,
        message: &str,
    ) -> Result<()> {
        job.mark_failed(FailureReason::Interrupted, now, duration_ms);
        job.last_error = Some(message.to_string());
        self.registry.save_state(job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RunMode, RunStatus, TriggerSource, WorkloadKind};
    use crate::port::job_registry::mocks::InMemoryJobRegistry;
    use crate::port::lease::mocks::InMemoryLeaseStore;
    use crate::port::phase_log_store::mocks::InMemoryPhaseLogStore;
    use crate::port::run_store::mocks::InMemoryRunStore;
    use crate::port::time_provider::mocks::ManualClock;

    const NOW: i64 = 5_000_000;

    struct Fixture {
        service: RecoveryService,
        registry: Arc<InMemoryJobRegistry>,
        runs: Arc<InMemoryRunStore>,
        phase_log: Arc<InMemoryPhaseLogStore>,
        leases: Arc<InMemoryLeaseStore>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(InMemoryJobRegistry::new());
        let runs = Arc::new(InMemoryRunStore::new());
        let phase_log = Arc::new(InMemoryPhaseLogStore::new());
        let leases = Arc::new(InMemoryLeaseStore::new());
        let service = RecoveryService::new(
            registry.clone(),
            runs.clone(),
            phase_log.clone(),
            leases.clone(),
            Arc::new(ManualClock::new(NOW)),
            "node-a",
        );
        Fixture {
            service,
            registry,
            runs,
            phase_log,
            leases,
        }
    }

    async fn in_flight_run(f: &Fixture, job_id: &str, run_id: &str, status: RunStatus) -> Run {
        let mut job = Job::new(job_id, 0, job_id, "pve-a", "pbs", "pve-b", 100, WorkloadKind::Container);
        job.mark_run_started(1_000);
        job.mark_status(status, 2_000);
        f.registry.insert(&job).await.unwrap();

        let mut run = Run::new(run_id, job_id, RunMode::Full, TriggerSource::Scheduled, 1_000);
        run.begin_attempt(1_000).unwrap();
        if status == RunStatus::BackingUp {
            run.enter_backup().unwrap();
        }
        f.runs.create(&mut run).await.unwrap();
        run
    }

    #[tokio::test]
    async fn test_non_terminal_runs_marked_interrupted() {
        let f = fixture();
        in_flight_run(&f, "job-1", "run-1", RunStatus::BackingUp).await;
        f.leases
            .try_acquire("job-1", "run-1", "node-a", 1_000, 10_000)
            .await
            .unwrap();

        assert_eq!(f.service.recover_interrupted_runs().await.unwrap(), 1);

        let run = f.runs.find_by_id("run-1").await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.failure, Some(FailureReason::Interrupted));
        assert_eq!(run.finished_at, Some(NOW));

        let job = f.registry.get("job-1").unwrap();
        assert_eq!(job.current_status, RunStatus::Failed);
        assert_eq!(job.last_failure, Some(FailureReason::Interrupted));

        let entries = f.phase_log.all();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].phase, Phase::Completion);
        assert_eq!(entries[0].failure, Some(FailureReason::Interrupted));

        assert!(f.leases.find("job-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_live_lease_of_other_owner_is_respected() {
        let f = fixture();
        in_flight_run(&f, "job-1", "run-1", RunStatus::Preparing).await;
        f.leases
            .try_acquire("job-1", "run-1", "node-b", NOW - 1_000, 60_000)
            .await
            .unwrap();

        assert_eq!(f.service.recover_interrupted_runs().await.unwrap(), 0);
        let run = f.runs.find_by_id("run-1").await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Preparing);
    }

    #[tokio::test]
    async fn test_expired_foreign_lease_is_recovered() {
        let f = fixture();
        in_flight_run(&f, "job-1", "run-1", RunStatus::Preparing).await;
        f.leases
            .try_acquire("job-1", "run-1", "node-b", 0, 1_000)
            .await
            .unwrap();

        assert_eq!(f.service.recover_interrupted_runs().await.unwrap(), 1);
        assert!(f.leases.find("job-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restart_under_new_owner_recovers_once_lease_lapses() {
        let f = fixture();
        in_flight_run(&f, "job-1", "run-1", RunStatus::BackingUp).await;
        // Crashed process held the lease under a different owner token
        f.leases
            .try_acquire("job-1", "run-1", "host-old", NOW - 5_000, 120_000)
            .await
            .unwrap();

        assert_eq!(f.service.recover_interrupted_runs().await.unwrap(), 0);

        let later = RecoveryService::new(
            f.registry.clone(),
            f.runs.clone(),
            f.phase_log.clone(),
            f.leases.clone(),
            Arc::new(ManualClock::new(NOW + 120_000)),
            "node-a",
        );
        assert_eq!(later.recover_orphaned_runs(|_| false).await.unwrap(), 1);

        let run = f.runs.find_by_id("run-1").await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.failure, Some(FailureReason::Interrupted));
        let job = f.registry.get("job-1").unwrap();
        assert_eq!(job.current_status, RunStatus::Failed);
        assert!(f.leases.find("job-1").await.unwrap().is_none());

        // Nothing left on the next sweep
        assert_eq!(later.recover_orphaned_runs(|_| false).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_skips_live_and_local_runs() {
        let f = fixture();
        in_flight_run(&f, "job-1", "run-1", RunStatus::BackingUp).await;
        f.leases
            .try_acquire("job-1", "run-1", "node-b", NOW - 1_000, 60_000)
            .await
            .unwrap();
        // No lease at all, but executing in this process
        in_flight_run(&f, "job-2", "run-2", RunStatus::Preparing).await;

        assert_eq!(
            f.service
                .recover_orphaned_runs(|run_id| run_id == "run-2")
                .await
                .unwrap(),
            0
        );
        assert_eq!(f.runs.find_by_id("run-1").await.unwrap().unwrap().status, RunStatus::BackingUp);
        assert_eq!(f.runs.find_by_id("run-2").await.unwrap().unwrap().status, RunStatus::Preparing);

        // Once no longer local, the lease-less run is an orphan
        assert_eq!(f.service.recover_orphaned_runs(|_| false).await.unwrap(), 1);
        assert_eq!(f.runs.find_by_id("run-2").await.unwrap().unwrap().status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_stale_job_status_reset() {
        let f = fixture();
        let mut job = Job::new("job-2", 0, "stale", "pve-a", "pbs", "pve-b", 7, WorkloadKind::Container);
        job.mark_run_started(1_000);
        f.registry.insert(&job).await.unwrap();

        assert_eq!(f.service.recover_interrupted_runs().await.unwrap(), 1);
        let job = f.registry.get("job-2").unwrap();
        assert_eq!(job.current_status, RunStatus::Failed);
        assert!(f.phase_log.all().is_empty());
    }

    #[tokio::test]
    async fn test_nothing_to_recover() {
        let f = fixture();
        assert_eq!(f.service.recover_interrupted_runs().await.unwrap(), 0);
    }
}
