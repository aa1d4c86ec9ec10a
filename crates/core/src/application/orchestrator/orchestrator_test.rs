//! Orchestrator state machine tests (in-memory ports, paused tokio time)

use super::*;
use crate::domain::{Capabilities, TerminalStatus, WorkloadKind};
use crate::port::id_provider::mocks::SequentialIdProvider;
use crate::port::job_registry::mocks::InMemoryJobRegistry;
use crate::port::lease::mocks::InMemoryLeaseStore;
use crate::port::notification::mocks::RecordingNotifier;
use crate::port::phase_log_store::mocks::InMemoryPhaseLogStore;
use crate::port::remote_operation::mocks::{Scripted, ScriptedRemoteClient};
use crate::port::remote_operation::OpErrorKind;
use crate::port::run_store::mocks::InMemoryRunStore;
use crate::port::time_provider::mocks::TokioClock;
use crate::port::topology::mocks::StaticTopology;

const EPOCH: i64 = 1_700_000_000_000;

struct Harness {
    orchestrator: Arc<Orchestrator>,
    registry: Arc<InMemoryJobRegistry>,
    runs: Arc<InMemoryRunStore>,
    phase_log: Arc<InMemoryPhaseLogStore>,
    leases: Arc<InMemoryLeaseStore>,
    remote: Arc<ScriptedRemoteClient>,
    notifier: Arc<RecordingNotifier>,
}

fn hosts() -> Vec<HostEndpoint> {
    let mut store = HostEndpoint::new("pbs", "pbs.lan", EPOCH);
    store.capabilities = Capabilities {
        source: false,
        intermediary: true,
        destination: false,
    };
    store.datastore = Some("backups".to_string());

    vec![
        HostEndpoint::new("pve-a", "pve-a.lan", EPOCH),
        store,
        HostEndpoint::new("pve-b", "pve-b.lan", EPOCH),
    ]
}

fn job(id: &str) -> Job {
    let mut job = Job::new(
        id,
        EPOCH,
        format!("{} recovery", id),
        "pve-a",
        "pbs",
        "pve-b",
        101,
        WorkloadKind::Container,
    );
    job.retry_delay_minutes = 1;
    job
}

fn config() -> OrchestratorConfig {
    OrchestratorConfig {
        owner_id: "node-test".to_string(),
        ..Default::default()
    }
}

async fn harness_with(
    remote: ScriptedRemoteClient,
    notifier: RecordingNotifier,
    topology: Vec<HostEndpoint>,
    config: OrchestratorConfig,
    jobs: Vec<Job>,
) -> Harness {
    let registry = Arc::new(InMemoryJobRegistry::new());
    for job in jobs {
        registry.insert(&job).await.unwrap();
    }
    let runs = Arc::new(InMemoryRunStore::new());
    let phase_log = Arc::new(InMemoryPhaseLogStore::new());
    let leases = Arc::new(InMemoryLeaseStore::new());
    let remote = Arc::new(remote);
    let notifier = Arc::new(notifier);

    let orchestrator = Arc::new(Orchestrator::new(
        OrchestratorDeps {
            registry: registry.clone(),
            runs: runs.clone(),
            phase_log: phase_log.clone(),
            leases: leases.clone(),
            topology: Arc::new(StaticTopology::new(topology)),
            remote: remote.clone(),
            notifier: notifier.clone(),
            time_provider: Arc::new(TokioClock::new(EPOCH)),
            id_provider: Arc::new(SequentialIdProvider::new("run")),
        },
        config,
    ));

    Harness {
        orchestrator,
        registry,
        runs,
        phase_log,
        leases,
        remote,
        notifier,
    }
}

async fn harness(remote: ScriptedRemoteClient, jobs: Vec<Job>) -> Harness {
    harness_with(remote, RecordingNotifier::new(), hosts(), config(), jobs).await
}

impl Harness {
    async fn admit(&self, job_id: &str, mode: RunMode) -> AdmittedRun {
        match self
            .orchestrator
            .admit(job_id, mode, TriggerSource::Manual)
            .await
            .unwrap()
        {
            Admission::Accepted(admitted) => admitted,
            Admission::Rejected(reason) => panic!("unexpected rejection: {}", reason),
        }
    }

    async fn run_to_end(&self, job_id: &str, mode: RunMode) -> Run {
        let admitted = self.admit(job_id, mode).await;
        self.orchestrator.execute(admitted).await.unwrap()
    }

    fn entries(&self, run_id: &str) -> Vec<PhaseLogEntry> {
        self.phase_log
            .all()
            .into_iter()
            .filter(|e| e.run_id == run_id)
            .collect()
    }

    fn phases(&self, run_id: &str) -> Vec<(Phase, PhaseStatus)> {
        self.entries(run_id)
            .iter()
            .map(|e| (e.phase, e.status))
            .collect()
    }
}

// ----------------------------------------------------------------------------
// Scenarios
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_backup_failure_without_retries_fails_run() {
    let mut job_a = job("job-a");
    job_a.notify_on_each_run = true;
    let remote = ScriptedRemoteClient::succeeding("snap-1")
        .then_backup(Scripted::Fail(OpErrorKind::RemoteExit, "vzdump exited 2".to_string()));
    let h = harness(remote, vec![job_a]).await;

    let run = h.run_to_end("job-a", RunMode::Full).await;

    assert_eq!(
        run.terminal_status(),
        Some(TerminalStatus::Failed(FailureReason::BackupFailed))
    );
    assert_eq!(run.attempt, 1);
    assert_eq!(h.remote.backup_calls().len(), 1);
    assert!(h.remote.restore_calls().is_empty());

    let backups: Vec<_> = h
        .entries(&run.id)
        .into_iter()
        .filter(|e| e.phase == Phase::Backup)
        .collect();
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0].status, PhaseStatus::Failed);
    assert_eq!(backups[0].failure, Some(FailureReason::BackupFailed));

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].status,
        TerminalStatus::Failed(FailureReason::BackupFailed)
    );
    assert!(sent[0]
        .output_excerpt
        .as_deref()
        .is_some_and(|o| o.contains("vzdump exited 2")));

    let stored = h.registry.get("job-a").unwrap();
    assert!(stored.last_artifact_ref.is_none());
    assert_eq!(stored.current_status, RunStatus::Failed);
    assert_eq!(stored.last_failure, Some(FailureReason::BackupFailed));
    assert_eq!(stored.consecutive_failure_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_full_run_records_artifact_and_summary() {
    let h = harness(ScriptedRemoteClient::succeeding("snap-42"), vec![job("job-b")]).await;

    let run = h.run_to_end("job-b", RunMode::Full).await;

    assert_eq!(run.terminal_status(), Some(TerminalStatus::Completed));
    assert_eq!(run.artifact_ref_produced, Some(ArtifactRef::new("snap-42")));
    assert_eq!(run.artifact_ref_used, Some(ArtifactRef::new("snap-42")));
    assert_eq!(
        h.phases(&run.id),
        vec![
            (Phase::Backup, PhaseStatus::Success),
            (Phase::Restore, PhaseStatus::Success),
            (Phase::Completion, PhaseStatus::Success),
        ]
    );

    let restore = &h.remote.restore_calls()[0];
    assert_eq!(restore.artifact, ArtifactRef::new("snap-42"));
    assert_eq!(restore.destination.host_ref, "pve-b");
    assert_eq!(restore.intermediary.host_ref, "pbs");

    let stored = h.registry.get("job-b").unwrap();
    assert_eq!(stored.last_artifact_ref, Some(ArtifactRef::new("snap-42")));
    assert_eq!(stored.current_status, RunStatus::Completed);
    assert_eq!(stored.run_count, 1);
    assert!(stored.last_backup_at.is_some());
    assert!(stored.last_restore_at.is_some());
    // Per-run notifications are off by default
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_restore_only_uses_last_artifact() {
    let h = harness(ScriptedRemoteClient::succeeding("snap-42"), vec![job("job-b")]).await;
    h.run_to_end("job-b", RunMode::Full).await;

    let run = h.run_to_end("job-b", RunMode::RestoreOnly).await;

    assert_eq!(run.terminal_status(), Some(TerminalStatus::Completed));
    assert_eq!(run.sequence, 2);
    assert_eq!(h.remote.backup_calls().len(), 1);
    let restores = h.remote.restore_calls();
    assert_eq!(restores.len(), 2);
    assert_eq!(restores[1].artifact, ArtifactRef::new("snap-42"));
    assert!(run.artifact_ref_produced.is_none());
    assert_eq!(
        h.phases(&run.id),
        vec![
            (Phase::Restore, PhaseStatus::Success),
            (Phase::Completion, PhaseStatus::Success),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_backup_only_skips_restore() {
    let h = harness(ScriptedRemoteClient::succeeding("snap-7"), vec![job("job-b")]).await;

    let run = h.run_to_end("job-b", RunMode::BackupOnly).await;

    assert_eq!(run.terminal_status(), Some(TerminalStatus::Completed));
    assert!(h.remote.restore_calls().is_empty());
    let stored = h.registry.get("job-b").unwrap();
    assert_eq!(stored.last_artifact_ref, Some(ArtifactRef::new("snap-7")));
    assert!(stored.last_restore_at.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_restore_only_without_artifact_fails_fast() {
    let h = harness(ScriptedRemoteClient::succeeding("unused"), vec![job("job-c")]).await;

    let run = h.run_to_end("job-c", RunMode::RestoreOnly).await;

    assert_eq!(
        run.terminal_status(),
        Some(TerminalStatus::Failed(FailureReason::NoArtifactAvailable))
    );
    assert!(h.remote.backup_calls().is_empty());
    assert!(h.remote.restore_calls().is_empty());
    assert_eq!(
        h.phases(&run.id),
        vec![(Phase::Preparation, PhaseStatus::Failed)]
    );
}

// ----------------------------------------------------------------------------
// Retries
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_retries_are_bounded_and_spaced() {
    let mut flaky = job("job-r");
    flaky.max_retries = 2;
    let remote = ScriptedRemoteClient::succeeding("never").with_default_backup(Scripted::Fail(
        OpErrorKind::Connection,
        "no route to host".to_string(),
    ));
    let h = harness(remote, vec![flaky]).await;

    let run = h.run_to_end("job-r", RunMode::Full).await;

    assert_eq!(
        run.terminal_status(),
        Some(TerminalStatus::Failed(FailureReason::BackupFailed))
    );
    assert_eq!(run.attempt, 3);
    assert_eq!(h.remote.backup_calls().len(), 3);

    let backups: Vec<_> = h
        .entries(&run.id)
        .into_iter()
        .filter(|e| e.phase == Phase::Backup)
        .collect();
    assert_eq!(backups.len(), 3);
    assert_eq!(
        backups.iter().map(|e| e.attempt).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    for pair in backups.windows(2) {
        assert!(pair[1].started_at - pair[0].started_at >= 60_000);
    }

    let stored = h.registry.get("job-r").unwrap();
    assert_eq!(stored.consecutive_failure_count, 3);
    assert_eq!(stored.error_count, 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_then_success_resets_failures() {
    let mut flaky = job("job-r");
    flaky.max_retries = 3;
    let remote = ScriptedRemoteClient::succeeding("snap-2").then_backup(Scripted::Fail(
        OpErrorKind::RemoteExit,
        "lock timeout".to_string(),
    ));
    let h = harness(remote, vec![flaky]).await;

    let run = h.run_to_end("job-r", RunMode::Full).await;

    assert_eq!(run.terminal_status(), Some(TerminalStatus::Completed));
    assert_eq!(run.attempt, 2);
    assert_eq!(
        h.phases(&run.id),
        vec![
            (Phase::Backup, PhaseStatus::Failed),
            (Phase::Backup, PhaseStatus::Success),
            (Phase::Restore, PhaseStatus::Success),
            (Phase::Completion, PhaseStatus::Success),
        ]
    );
    let stored = h.registry.get("job-r").unwrap();
    assert_eq!(stored.consecutive_failure_count, 0);
    assert_eq!(stored.error_count, 1);
    assert!(stored.last_failure.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_restore_failure_keeps_new_artifact() {
    let remote = ScriptedRemoteClient::succeeding("snap-9").with_default_restore(Scripted::Fail(
        OpErrorKind::RemoteExit,
        "storage full".to_string(),
    ));
    let h = harness(remote, vec![job("job-d")]).await;

    let run = h.run_to_end("job-d", RunMode::Full).await;

    assert_eq!(
        run.terminal_status(),
        Some(TerminalStatus::Failed(FailureReason::RestoreFailed))
    );
    let stored = h.registry.get("job-d").unwrap();
    assert_eq!(stored.last_artifact_ref, Some(ArtifactRef::new("snap-9")));
    assert!(stored.last_restore_at.is_none());
    assert_eq!(
        h.phases(&run.id),
        vec![
            (Phase::Backup, PhaseStatus::Success),
            (Phase::Restore, PhaseStatus::Failed),
            (Phase::Completion, PhaseStatus::Failed),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_backup_timeout_is_a_backup_failure() {
    let h = harness_with(
        ScriptedRemoteClient::succeeding("x").with_default_backup(Scripted::Hang),
        RecordingNotifier::new(),
        hosts(),
        OrchestratorConfig {
            backup_timeout: Duration::from_secs(30),
            ..config()
        },
        vec![job("job-t")],
    )
    .await;

    let run = h.run_to_end("job-t", RunMode::Full).await;

    assert_eq!(
        run.terminal_status(),
        Some(TerminalStatus::Failed(FailureReason::BackupFailed))
    );
    assert!(run
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("timed out")));
    assert!(h.remote.restore_calls().is_empty());
}

// ----------------------------------------------------------------------------
// Preparation
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_unregistered_host_fails_preparation_without_remote_calls() {
    let mut broken = job("job-p");
    broken.destination_host_ref = "pve-missing".to_string();
    broken.max_retries = 5;
    let h = harness(ScriptedRemoteClient::succeeding("x"), vec![broken]).await;

    let run = h.run_to_end("job-p", RunMode::Full).await;

    assert_eq!(
        run.terminal_status(),
        Some(TerminalStatus::Failed(FailureReason::PreparationFailed))
    );
    assert_eq!(run.attempt, 1);
    assert!(h.remote.backup_calls().is_empty());
    let entries = h.entries(&run.id);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].phase, Phase::Preparation);
    assert!(entries[0]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("pve-missing")));
}

#[tokio::test(start_paused = true)]
async fn test_incapable_intermediary_fails_preparation() {
    let mut broken = job("job-p");
    broken.intermediary_host_ref = "pve-b".to_string();
    let h = harness(ScriptedRemoteClient::succeeding("x"), vec![broken]).await;

    let run = h.run_to_end("job-p", RunMode::BackupOnly).await;

    assert_eq!(run.failure, Some(FailureReason::PreparationFailed));
    assert!(run
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("intermediary-capable")));
    assert!(h.remote.backup_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_offline_source_fails_preparation() {
    let mut topology = hosts();
    topology[0].is_online = false;
    let h = harness_with(
        ScriptedRemoteClient::succeeding("x"),
        RecordingNotifier::new(),
        topology,
        config(),
        vec![job("job-o")],
    )
    .await;

    let run = h.run_to_end("job-o", RunMode::Full).await;

    assert_eq!(run.failure, Some(FailureReason::PreparationFailed));
    assert!(h.remote.backup_calls().is_empty());
}

// ----------------------------------------------------------------------------
// Exclusivity and leases
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_second_request_rejected_while_run_active() {
    let h = harness(ScriptedRemoteClient::succeeding("snap-1"), vec![job("job-x")]).await;

    let first = h.admit("job-x", RunMode::Full).await;
    let second = h
        .orchestrator
        .admit("job-x", RunMode::BackupOnly, TriggerSource::Scheduled)
        .await
        .unwrap();
    assert!(matches!(
        second,
        Admission::Rejected(RejectReason::AlreadyRunning)
    ));
    assert_eq!(h.runs.all().len(), 1);

    h.orchestrator.execute(first).await.unwrap();
    assert!(h.leases.find("job-x").await.unwrap().is_none());
    assert_eq!(h.orchestrator.active_run_count(), 0);

    // Lease released: the next request is accepted
    let third = h.admit("job-x", RunMode::Full).await;
    assert_eq!(third.run.sequence, 2);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_job_is_not_found() {
    let h = harness(ScriptedRemoteClient::succeeding("x"), vec![]).await;
    let result = h
        .orchestrator
        .admit("ghost", RunMode::Full, TriggerSource::Manual)
        .await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn test_lease_heartbeats_during_long_operation() {
    let h = harness_with(
        ScriptedRemoteClient::succeeding("snap-slow").with_latency(Duration::from_secs(100)),
        RecordingNotifier::new(),
        hosts(),
        OrchestratorConfig {
            lease: LeaseConfig::with_ttl(Duration::from_secs(30)),
            ..config()
        },
        vec![job("job-slow")],
    )
    .await;

    let run = h.run_to_end("job-slow", RunMode::Full).await;

    assert_eq!(run.terminal_status(), Some(TerminalStatus::Completed));
    // 200s of remote work with a 10s heartbeat interval
    assert!(h.leases.heartbeat_count() >= 10);
    assert!(h.leases.find("job-slow").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_lease_taken_over_stops_run_as_interrupted() {
    let h = harness_with(
        ScriptedRemoteClient::succeeding("x").with_default_backup(Scripted::Hang),
        RecordingNotifier::new(),
        hosts(),
        OrchestratorConfig {
            lease: LeaseConfig::with_ttl(Duration::from_secs(30)),
            ..config()
        },
        vec![job("job-l")],
    )
    .await;

    let admitted = h.admit("job-l", RunMode::Full).await;
    let run_id = admitted.run_id().to_string();
    let task = h.orchestrator.spawn(admitted);

    tokio::time::sleep(Duration::from_secs(1)).await;
    // Another owner takes the job over
    h.leases.release_for_run(&run_id).await.unwrap();
    h.leases
        .try_acquire("job-l", "run-other", "node-b", EPOCH + 1_000, 30_000)
        .await
        .unwrap()
        .unwrap();

    tokio::time::timeout(Duration::from_secs(60), task)
        .await
        .expect("run should stop after losing its lease")
        .unwrap();

    let run = h.runs.find_by_id(&run_id).await.unwrap().unwrap();
    assert_eq!(
        run.terminal_status(),
        Some(TerminalStatus::Failed(FailureReason::Interrupted))
    );
    assert_eq!(
        h.phases(&run_id),
        vec![
            (Phase::Backup, PhaseStatus::Failed),
            (Phase::Completion, PhaseStatus::Failed),
        ]
    );
    // The new holder keeps its lease
    assert_eq!(h.leases.find("job-l").await.unwrap().unwrap().owner, "node-b");
}

/// Lease store whose renewals always fail
struct UnrenewableLeases(InMemoryLeaseStore);

#[async_trait::async_trait]
impl LeaseStore for UnrenewableLeases {
    async fn try_acquire(
        &self,
        job_id: &str,
        run_id: &str,
        owner: &str,
        now_millis: i64,
        ttl_ms: i64,
    ) -> Result<Option<LeaseRecord>> {
        self.0.try_acquire(job_id, run_id, owner, now_millis, ttl_ms).await
    }

    async fn heartbeat(&self, _lease: &LeaseRecord, _now: i64, _ttl_ms: i64) -> Result<()> {
        Err(AppError::Database("database is locked".to_string()))
    }

    async fn release(&self, lease: &LeaseRecord) -> Result<()> {
        self.0.release(lease).await
    }

    async fn find(&self, job_id: &str) -> Result<Option<LeaseRecord>> {
        self.0.find(job_id).await
    }

    async fn release_for_run(&self, run_id: &str) -> Result<u64> {
        self.0.release_for_run(run_id).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_unrenewable_lease_stops_run_before_expiry() {
    let registry = Arc::new(InMemoryJobRegistry::new());
    registry.insert(&job("job-u")).await.unwrap();
    let runs = Arc::new(InMemoryRunStore::new());
    let orchestrator = Arc::new(Orchestrator::new(
        OrchestratorDeps {
            registry: registry.clone(),
            runs: runs.clone(),
            phase_log: Arc::new(InMemoryPhaseLogStore::new()),
            leases: Arc::new(UnrenewableLeases(InMemoryLeaseStore::new())),
            topology: Arc::new(StaticTopology::new(hosts())),
            remote: Arc::new(
                ScriptedRemoteClient::succeeding("x").with_default_backup(Scripted::Hang),
            ),
            notifier: Arc::new(RecordingNotifier::new()),
            time_provider: Arc::new(TokioClock::new(EPOCH)),
            id_provider: Arc::new(SequentialIdProvider::new("run")),
        },
        OrchestratorConfig {
            lease: LeaseConfig::with_ttl(Duration::from_secs(120)),
            ..config()
        },
    ));

    let Admission::Accepted(admitted) = orchestrator
        .admit("job-u", RunMode::Full, TriggerSource::Manual)
        .await
        .unwrap()
    else {
        panic!("first admission should be accepted");
    };
    let run_id = admitted.run_id().to_string();
    let task = orchestrator.spawn(admitted);

    // Renewals at 40s and 80s fail; the run stops before the lease lapses at 120s
    tokio::time::sleep(Duration::from_secs(100)).await;
    assert!(task.is_finished());
    let run = runs.find_by_id(&run_id).await.unwrap().unwrap();
    assert_eq!(run.failure, Some(FailureReason::Interrupted));

    tokio::time::sleep(Duration::from_secs(30)).await;
    let second = orchestrator
        .admit("job-u", RunMode::Full, TriggerSource::Scheduled)
        .await
        .unwrap();
    assert!(matches!(second, Admission::Accepted(_)));
    let open = runs.all().into_iter().filter(|r| !r.is_terminal()).count();
    assert_eq!(open, 1);
}

// ----------------------------------------------------------------------------
// Panic isolation
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_panicking_run_is_interrupted_and_notified() {
    let mut fragile = job("job-p");
    fragile.notify_on_each_run = true;
    let h = harness(
        ScriptedRemoteClient::succeeding("x")
            .with_default_backup(Scripted::Panic("remote client bug".to_string())),
        vec![fragile],
    )
    .await;

    let admitted = h.admit("job-p", RunMode::Full).await;
    let run_id = admitted.run_id().to_string();
    h.orchestrator.spawn(admitted).await.unwrap();

    let run = h.runs.find_by_id(&run_id).await.unwrap().unwrap();
    assert_eq!(
        run.terminal_status(),
        Some(TerminalStatus::Failed(FailureReason::Interrupted))
    );

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].status,
        TerminalStatus::Failed(FailureReason::Interrupted)
    );

    let stored = h.registry.get("job-p").unwrap();
    assert_eq!(stored.current_status, RunStatus::Failed);
    assert_eq!(stored.consecutive_failure_count, 1);
    assert_eq!(stored.error_count, 1);
    assert!(stored.last_error.is_some());

    assert!(h.leases.find("job-p").await.unwrap().is_none());
    assert_eq!(h.orchestrator.active_run_count(), 0);
}

// ----------------------------------------------------------------------------
// Cancellation
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backup() {
    let h = harness(
        ScriptedRemoteClient::succeeding("x").with_default_backup(Scripted::Hang),
        vec![job("job-c")],
    )
    .await;

    let admitted = h.admit("job-c", RunMode::Full).await;
    let run_id = admitted.run_id().to_string();
    let task = h.orchestrator.spawn(admitted);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(
        h.runs.find_by_id(&run_id).await.unwrap().unwrap().status,
        RunStatus::BackingUp
    );
    assert!(h.orchestrator.cancel_run(&run_id).await.unwrap());
    task.await.unwrap();

    let run = h.runs.find_by_id(&run_id).await.unwrap().unwrap();
    assert_eq!(
        run.terminal_status(),
        Some(TerminalStatus::Failed(FailureReason::Cancelled))
    );
    assert_eq!(
        h.phases(&run_id),
        vec![
            (Phase::Backup, PhaseStatus::Cancelled),
            (Phase::Completion, PhaseStatus::Cancelled),
        ]
    );
    assert!(h.leases.find("job-c").await.unwrap().is_none());

    // Terminal runs report false
    assert!(!h.orchestrator.cancel_run(&run_id).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_retry_delay() {
    let mut flaky = job("job-c");
    flaky.max_retries = 3;
    flaky.retry_delay_minutes = 10;
    let remote = ScriptedRemoteClient::succeeding("x").with_default_backup(Scripted::Fail(
        OpErrorKind::RemoteExit,
        "busy".to_string(),
    ));
    let h = harness(remote, vec![flaky]).await;

    let admitted = h.admit("job-c", RunMode::Full).await;
    let run_id = admitted.run_id().to_string();
    let task = h.orchestrator.spawn(admitted);

    tokio::time::sleep(Duration::from_secs(5)).await;
    let pending = h.runs.find_by_id(&run_id).await.unwrap().unwrap();
    assert_eq!(pending.status, RunStatus::RetryPending);
    assert!(pending.next_attempt_at.is_some());
    assert_eq!(
        h.registry.get("job-c").unwrap().current_status,
        RunStatus::RetryPending
    );

    h.orchestrator.cancel_run(&run_id).await.unwrap();
    task.await.unwrap();

    let run = h.runs.find_by_id(&run_id).await.unwrap().unwrap();
    assert_eq!(run.failure, Some(FailureReason::Cancelled));
    assert_eq!(h.remote.backup_calls().len(), 1);
    assert_eq!(
        h.registry.get("job-c").unwrap().last_failure,
        Some(FailureReason::Cancelled)
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_unknown_run_is_not_found() {
    let h = harness(ScriptedRemoteClient::succeeding("x"), vec![]).await;
    assert!(matches!(
        h.orchestrator.cancel_run("nope").await,
        Err(AppError::NotFound(_))
    ));
}

// ----------------------------------------------------------------------------
// Notifications
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_notification_failure_does_not_change_outcome() {
    let mut noisy = job("job-n");
    noisy.notify_on_each_run = true;
    let h = harness_with(
        ScriptedRemoteClient::succeeding("snap-n"),
        RecordingNotifier::failing(),
        hosts(),
        config(),
        vec![noisy],
    )
    .await;

    let run = h.run_to_end("job-n", RunMode::Full).await;

    assert_eq!(run.terminal_status(), Some(TerminalStatus::Completed));
    assert_eq!(h.notifier.sent().len(), 1);
    assert_eq!(
        h.registry.get("job-n").unwrap().current_status,
        RunStatus::Completed
    );
}

#[test]
fn test_format_duration() {
    assert_eq!(format_duration(1_500), "1.5s");
    assert_eq!(format_duration(125_000), "2m 05s");
    assert_eq!(format_duration(3_723_000), "1h 02m 03s");
    assert_eq!(format_duration(-5), "0.0s");
}
