// Orchestrator - per-run recovery state machine
//
// Idle -> Preparing -> BackingUp -> Restoring -> Completed
//                 \-> Restoring (restore-only)    \-> Failed(reason)
//
// A run holds its job's lease from admission until it is terminal, across
// every retry attempt. Phase failures are converted into run state here and
// never propagate to callers.

pub mod cancel;
pub mod constants;
mod heartbeat;

#[cfg(test)]
mod orchestrator_test;

pub use cancel::{cancel_channel, CancelCause, CancelHandle, CancelToken};

use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::domain::phase_log::truncate_chars;
use crate::domain::{
    ArtifactRef, FailureReason, HostEndpoint, HostRole, Job, Phase, PhaseLogEntry, PhaseStatus,
    Run, RunId, RunMode, RunStatus, TriggerSource,
};
use crate::error::{AppError, Result};
use crate::port::{
    BackupRequest, IdProvider, JobRegistry, LeaseConfig, LeaseRecord, LeaseStore,
    NotificationGateway, PhaseLogStore, RemoteOperationClient, RestoreRequest, RunNotification,
    RunStore, TimeProvider, TopologyProvider,
};
use constants::DEFAULT_REMOTE_TIMEOUT;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Orchestrator tuning
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Lease owner token of this process
    pub owner_id: String,
    pub lease: LeaseConfig,
    pub backup_timeout: Duration,
    pub restore_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            owner_id: "ferry-local".to_string(),
            lease: LeaseConfig::default(),
            backup_timeout: DEFAULT_REMOTE_TIMEOUT,
            restore_timeout: DEFAULT_REMOTE_TIMEOUT,
        }
    }
}

/// Ports the orchestrator drives
pub struct OrchestratorDeps {
    pub registry: Arc<dyn JobRegistry>,
    pub runs: Arc<dyn RunStore>,
    pub phase_log: Arc<dyn PhaseLogStore>,
    pub leases: Arc<dyn LeaseStore>,
    pub topology: Arc<dyn TopologyProvider>,
    pub remote: Arc<dyn RemoteOperationClient>,
    pub notifier: Arc<dyn NotificationGateway>,
    pub time_provider: Arc<dyn TimeProvider>,
    pub id_provider: Arc<dyn IdProvider>,
}

/// Why a run request was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    AlreadyRunning,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::AlreadyRunning => "already-running",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A run that owns its job's lease and is ready to execute
pub struct AdmittedRun {
    pub job: Job,
    pub run: Run,
    lease: LeaseRecord,
    cancel: CancelToken,
    signal: CancelHandle,
}

impl AdmittedRun {
    pub fn run_id(&self) -> &str {
        &self.run.id
    }
}

pub enum Admission {
    Accepted(AdmittedRun),
    Rejected(RejectReason),
}

/// Hosts resolved during preparation
struct ResolvedHosts {
    source: Option<HostEndpoint>,
    intermediary: HostEndpoint,
    destination: Option<HostEndpoint>,
}

/// A failed attempt, before the retry decision
struct AttemptFailure {
    reason: FailureReason,
    message: String,
    output: Option<String>,
}

impl AttemptFailure {
    fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
            output: None,
        }
    }

    /// The run was signalled to stop; lease loss ends it as interrupted
    fn stopped(cause: Option<CancelCause>, during: &str) -> Self {
        match cause {
            Some(CancelCause::LeaseLost) => Self::new(
                FailureReason::Interrupted,
                format!("job lease lost {}", during),
            ),
            _ => Self::new(
                FailureReason::Cancelled,
                format!("cancelled by operator {}", during),
            ),
        }
    }

    fn phase_status(&self) -> PhaseStatus {
        if self.reason == FailureReason::Cancelled {
            PhaseStatus::Cancelled
        } else {
            PhaseStatus::Failed
        }
    }
}

enum AttemptOutcome {
    Completed,
    Failed(AttemptFailure),
}

/// Outcome of a phase: `Ok(value)` or the failure that ends the attempt
type PhaseResult<T> = std::result::Result<T, AttemptFailure>;

pub struct Orchestrator {
    registry: Arc<dyn JobRegistry>,
    runs: Arc<dyn RunStore>,
    phase_log: Arc<dyn PhaseLogStore>,
    leases: Arc<dyn LeaseStore>,
    topology: Arc<dyn TopologyProvider>,
    remote: Arc<dyn RemoteOperationClient>,
    notifier: Arc<dyn NotificationGateway>,
    time_provider: Arc<dyn TimeProvider>,
    id_provider: Arc<dyn IdProvider>,
    retry_policy: RetryPolicy,
    config: OrchestratorConfig,
    /// Cancellation handles of runs executing in this process
    active: Mutex<HashMap<RunId, CancelHandle>>,
}

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps, config: OrchestratorConfig) -> Self {
        Self {
            retry_policy: RetryPolicy::new(Arc::clone(&deps.time_provider)),
            registry: deps.registry,
            runs: deps.runs,
            phase_log: deps.phase_log,
            leases: deps.leases,
            topology: deps.topology,
            remote: deps.remote,
            notifier: deps.notifier,
            time_provider: deps.time_provider,
            id_provider: deps.id_provider,
            config,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    fn now(&self) -> i64 {
        self.time_provider.now_millis()
    }

    fn active_runs(&self) -> MutexGuard<'_, HashMap<RunId, CancelHandle>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of runs executing in this process
    pub fn active_run_count(&self) -> usize {
        self.active_runs().len()
    }

    // ------------------------------------------------------------------
    // Admission
    // ------------------------------------------------------------------

    /// Acquire the job's lease and create the run record.
    ///
    /// Returns `Rejected(AlreadyRunning)` without creating a run when another
    /// run holds the lease.
    pub async fn admit(
        &self,
        job_id: &str,
        mode: RunMode,
        trigger: TriggerSource,
    ) -> Result<Admission> {
        let job = self
            .registry
            .find_by_id(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job {}", job_id)))?;

        let now = self.now();
        let run_id = self.id_provider.generate_id();

        let Some(lease) = self
            .leases
            .try_acquire(
                &job.id,
                &run_id,
                &self.config.owner_id,
                now,
                self.config.lease.ttl_ms(),
            )
            .await?
        else {
            info!(
                job_id = %job.id,
                mode = %mode,
                trigger = %trigger,
                "Run rejected: job already has an active run"
            );
            return Ok(Admission::Rejected(RejectReason::AlreadyRunning));
        };

        match self.open_run(job, run_id, mode, trigger, now).await {
            Ok((job, run)) => {
                let (handle, token) = cancel_channel();
                self.active_runs().insert(run.id.clone(), handle.clone());
                info!(
                    job_id = %job.id,
                    run_id = %run.id,
                    sequence = %run.sequence,
                    mode = %mode,
                    trigger = %trigger,
                    "Run admitted"
                );
                Ok(Admission::Accepted(AdmittedRun {
                    job,
                    run,
                    lease,
                    cancel: token,
                    signal: handle,
                }))
            }
            Err(e) => {
                if let Err(release_err) = self.leases.release(&lease).await {
                    error!(job_id = %lease.job_id, error = %release_err, "Failed to release lease");
                }
                Err(e)
            }
        }
    }

    /// Create the run in `Preparing` and mark the job as owned
    async fn open_run(
        &self,
        mut job: Job,
        run_id: RunId,
        mode: RunMode,
        trigger: TriggerSource,
        now: i64,
    ) -> Result<(Job, Run)> {
        let mut run = Run::new(run_id, job.id.clone(), mode, trigger, now);
        run.begin_attempt(now)?;
        self.runs.create(&mut run).await?;

        job.mark_run_started(now);
        self.registry.save_state(&job).await?;

        // Configuration updates are rejected from here on; reload the latest
        let job = self
            .registry
            .find_by_id(&job.id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job {}", job.id)))?;
        Ok((job, run))
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Execute an admitted run on its own task with panic isolation
    pub fn spawn(self: &Arc<Self>, admitted: AdmittedRun) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let job_id = admitted.job.id.clone();
            let run_id = admitted.run.id.clone();
            let lease = admitted.lease.clone();

            let runner = Arc::clone(&this);
            let handle = tokio::spawn(async move { runner.execute(admitted).await });

            match handle.await {
                Ok(Ok(run)) => debug!(
                    job_id = %job_id,
                    run_id = %run_id,
                    status = %run.status,
                    "Run task finished"
                ),
                Ok(Err(e)) => error!(job_id = %job_id, run_id = %run_id, error = %e, "Run aborted"),
                Err(join_err) => {
                    error!(job_id = %job_id, run_id = %run_id, error = ?join_err, "Run task panicked");
                    this.abandon(&job_id, &run_id, "run task panicked").await;
                    this.finish(&lease).await;
                }
            }
        })
    }

    /// Drive an admitted run to a terminal state, then release its lease
    pub async fn execute(&self, admitted: AdmittedRun) -> Result<Run> {
        let AdmittedRun {
            mut job,
            mut run,
            lease,
            mut cancel,
            signal,
        } = admitted;

        let heartbeat = heartbeat::spawn(
            Arc::clone(&self.leases),
            Arc::clone(&self.time_provider),
            lease.clone(),
            self.config.lease.clone(),
            signal,
        );

        let result = self.drive(&mut job, &mut run, &mut cancel).await;
        if let Err(e) = &result {
            error!(job_id = %job.id, run_id = %run.id, error = %e, "Run failed with an internal error");
            self.abandon(&job.id, &run.id, &format!("internal error: {}", e))
                .await;
        }

        drop(heartbeat);
        self.finish(&lease).await;
        result.map(|()| run)
    }

    async fn drive(&self, job: &mut Job, run: &mut Run, cancel: &mut CancelToken) -> Result<()> {
        loop {
            let failure = match self.run_attempt(job, run, cancel).await? {
                AttemptOutcome::Completed => return self.finish_completed(job, run).await,
                AttemptOutcome::Failed(failure) => failure,
            };

            let now = self.now();
            job.record_failed_attempt(
                failure.reason,
                truncate_chars(&failure.message, crate::domain::phase_log::MAX_ERROR_CHARS),
                now,
            );

            match self.retry_policy.decide(job, run, failure.reason) {
                RetryDecision::GiveUp => return self.finish_failed(job, run, failure).await,
                RetryDecision::Retry {
                    delay_ms,
                    next_attempt_at,
                } => {
                    run.schedule_retry(failure.reason, failure.message.clone(), next_attempt_at)?;
                    job.mark_status(RunStatus::RetryPending, now);
                    self.runs.update(run).await?;
                    self.registry.save_state(job).await?;

                    let delay = Duration::from_millis(delay_ms.max(0) as u64);
                    let cancelled = tokio::select! {
                        _ = tokio::time::sleep(delay) => false,
                        _ = cancel.cancelled() => true,
                    };
                    if cancelled {
                        info!(job_id = %job.id, run_id = %run.id, "Run stopped during retry delay");
                        let failure = AttemptFailure::stopped(cancel.cause(), "during retry delay");
                        return self.finish_failed(job, run, failure).await;
                    }

                    let now = self.now();
                    run.begin_attempt(now)?;
                    job.mark_status(RunStatus::Preparing, now);
                    self.runs.update(run).await?;
                    self.registry.save_state(job).await?;
                }
            }
        }
    }

    /// One attempt: preparation, then backup and/or restore per mode
    async fn run_attempt(
        &self,
        job: &mut Job,
        run: &mut Run,
        cancel: &mut CancelToken,
    ) -> Result<AttemptOutcome> {
        info!(
            job_id = %job.id,
            run_id = %run.id,
            attempt = %run.attempt,
            mode = %run.requested_mode,
            "Attempt started"
        );

        if cancel.is_cancelled() {
            return Ok(AttemptOutcome::Failed(AttemptFailure::stopped(
                cancel.cause(),
                "before preparation",
            )));
        }

        let prep_started = self.now();
        let hosts = match self.prepare(job, run).await? {
            Ok(hosts) => hosts,
            Err(failure) => {
                warn!(
                    job_id = %job.id,
                    run_id = %run.id,
                    reason = %failure.reason,
                    error = %failure.message,
                    "Preparation failed"
                );
                let entry = self
                    .entry(run, Phase::Preparation, PhaseStatus::Failed, prep_started, &failure.message)
                    .with_error(&failure.message)
                    .with_failure(failure.reason);
                self.record_phase(run, entry).await?;
                return Ok(AttemptOutcome::Failed(failure));
            }
        };

        let artifact = if run.requested_mode.includes_backup() {
            if cancel.is_cancelled() {
                return Ok(AttemptOutcome::Failed(AttemptFailure::stopped(
                    cancel.cause(),
                    "before backup",
                )));
            }
            run.enter_backup()?;
            job.mark_status(RunStatus::BackingUp, self.now());
            self.runs.update(run).await?;
            self.registry.save_state(job).await?;

            match self.backup_phase(job, run, &hosts, cancel).await? {
                Ok(artifact) => artifact,
                Err(failure) => return Ok(AttemptOutcome::Failed(failure)),
            }
        } else {
            match job.last_artifact_ref.clone() {
                Some(artifact) => artifact,
                None => {
                    return Err(AppError::InvalidState(
                        "restore-only run passed preparation without an artifact".to_string(),
                    ))
                }
            }
        };

        if !run.requested_mode.includes_restore() {
            return Ok(AttemptOutcome::Completed);
        }

        if cancel.is_cancelled() {
            return Ok(AttemptOutcome::Failed(AttemptFailure::stopped(
                cancel.cause(),
                "before restore",
            )));
        }
        run.enter_restore(artifact.clone())?;
        job.mark_status(RunStatus::Restoring, self.now());
        self.runs.update(run).await?;
        self.registry.save_state(job).await?;

        match self.restore_phase(job, run, &hosts, artifact, cancel).await? {
            Ok(()) => Ok(AttemptOutcome::Completed),
            Err(failure) => Ok(AttemptOutcome::Failed(failure)),
        }
    }

    /// Check preconditions; no remote calls are issued here
    async fn prepare(&self, job: &Job, run: &Run) -> Result<PhaseResult<ResolvedHosts>> {
        let mode = run.requested_mode;

        if mode == RunMode::RestoreOnly && job.last_artifact_ref.is_none() {
            return Ok(Err(AttemptFailure::new(
                FailureReason::NoArtifactAvailable,
                "no successful backup artifact recorded for this job",
            )));
        }

        let intermediary = match self
            .resolve_role(&job.intermediary_host_ref, HostRole::Intermediary)
            .await?
        {
            Ok(host) => host,
            Err(failure) => return Ok(Err(failure)),
        };

        let source = if mode.includes_backup() {
            match self.resolve_role(&job.source_host_ref, HostRole::Source).await? {
                Ok(host) => Some(host),
                Err(failure) => return Ok(Err(failure)),
            }
        } else {
            None
        };

        let destination = if mode.includes_restore() {
            match self
                .resolve_role(&job.destination_host_ref, HostRole::Destination)
                .await?
            {
                Ok(host) => Some(host),
                Err(failure) => return Ok(Err(failure)),
            }
        } else {
            None
        };

        Ok(Ok(ResolvedHosts {
            source,
            intermediary,
            destination,
        }))
    }

    async fn resolve_role(
        &self,
        host_ref: &str,
        role: HostRole,
    ) -> Result<PhaseResult<HostEndpoint>> {
        let failure = |message: String| -> PhaseResult<HostEndpoint> {
            Err(AttemptFailure::new(FailureReason::PreparationFailed, message))
        };

        Ok(match self.topology.resolve(host_ref).await? {
            None => failure(format!("{} host '{}' is not registered", role, host_ref)),
            Some(host) if !host.supports(role) => failure(format!(
                "host '{}' is not {}-capable",
                host_ref,
                role.to_string().to_lowercase()
            )),
            Some(host) if !host.is_online => {
                failure(format!("{} host '{}' is offline", role, host_ref))
            }
            Some(host) => Ok(host),
        })
    }

    async fn backup_phase(
        &self,
        job: &mut Job,
        run: &mut Run,
        hosts: &ResolvedHosts,
        cancel: &mut CancelToken,
    ) -> Result<PhaseResult<ArtifactRef>> {
        let source = hosts
            .source
            .clone()
            .ok_or_else(|| AppError::Internal("source host not resolved".to_string()))?;
        let request = BackupRequest {
            source,
            intermediary: hosts.intermediary.clone(),
            workload_id: job.workload_id,
            workload_kind: job.workload_kind,
            options: job.options.clone(),
        };

        let started = self.now();
        info!(
            job_id = %job.id,
            run_id = %run.id,
            attempt = %run.attempt,
            source = %job.source_descriptor(),
            "Backup phase started"
        );

        let result = tokio::select! {
            r = self.remote.backup(&request, self.config.backup_timeout) => Some(r),
            _ = cancel.cancelled() => None,
        };

        match result {
            None => {
                let failure = AttemptFailure::stopped(cancel.cause(), "during backup");
                let entry = self
                    .entry(run, Phase::Backup, failure.phase_status(), started, &failure.message)
                    .with_failure(failure.reason);
                self.record_phase(run, entry).await?;
                Ok(Err(failure))
            }
            Some(Ok(outcome)) => {
                let message = format!(
                    "backup of {} produced {}",
                    job.source_descriptor(),
                    outcome.artifact
                );
                let entry = self
                    .entry(run, Phase::Backup, PhaseStatus::Success, started, &message)
                    .with_output(&outcome.output)
                    .with_artifact(outcome.artifact.clone());
                self.record_phase(run, entry).await?;

                // Publish only once the successful phase is durably recorded
                run.record_backup_artifact(outcome.artifact.clone())?;
                self.runs.update(run).await?;
                job.record_artifact(outcome.artifact.clone(), self.now());
                self.registry.save_state(job).await?;

                info!(
                    job_id = %job.id,
                    run_id = %run.id,
                    artifact = %outcome.artifact,
                    "Backup phase succeeded"
                );
                Ok(Ok(outcome.artifact))
            }
            Some(Err(op)) => {
                warn!(
                    job_id = %job.id,
                    run_id = %run.id,
                    kind = %op.kind,
                    error = %op.message,
                    "Backup phase failed"
                );
                let message = format!("backup failed: {}", op);
                let entry = self
                    .entry(run, Phase::Backup, PhaseStatus::Failed, started, &message)
                    .with_output(&op.output)
                    .with_error(&op.message)
                    .with_failure(FailureReason::BackupFailed);
                self.record_phase(run, entry).await?;
                Ok(Err(AttemptFailure {
                    reason: FailureReason::BackupFailed,
                    message,
                    output: Some(op.output),
                }))
            }
        }
    }

    async fn restore_phase(
        &self,
        job: &mut Job,
        run: &mut Run,
        hosts: &ResolvedHosts,
        artifact: ArtifactRef,
        cancel: &mut CancelToken,
    ) -> Result<PhaseResult<()>> {
        let destination = hosts
            .destination
            .clone()
            .ok_or_else(|| AppError::Internal("destination host not resolved".to_string()))?;
        let request = RestoreRequest {
            intermediary: hosts.intermediary.clone(),
            destination,
            artifact: artifact.clone(),
            workload_id: job.workload_id,
            workload_kind: job.workload_kind,
            options: job.options.clone(),
        };

        let started = self.now();
        info!(
            job_id = %job.id,
            run_id = %run.id,
            attempt = %run.attempt,
            artifact = %artifact,
            destination = %job.destination_descriptor(),
            "Restore phase started"
        );

        let result = tokio::select! {
            r = self.remote.restore(&request, self.config.restore_timeout) => Some(r),
            _ = cancel.cancelled() => None,
        };

        match result {
            None => {
                let failure = AttemptFailure::stopped(cancel.cause(), "during restore");
                let entry = self
                    .entry(run, Phase::Restore, failure.phase_status(), started, &failure.message)
                    .with_artifact(artifact)
                    .with_failure(failure.reason);
                self.record_phase(run, entry).await?;
                Ok(Err(failure))
            }
            Some(Ok(outcome)) => {
                let message = format!(
                    "restored {} as {}:{}",
                    artifact, job.destination_host_ref, outcome.restored_workload_id
                );
                let entry = self
                    .entry(run, Phase::Restore, PhaseStatus::Success, started, &message)
                    .with_output(&outcome.output)
                    .with_artifact(artifact);
                self.record_phase(run, entry).await?;

                job.record_restore(self.now());
                self.registry.save_state(job).await?;

                info!(job_id = %job.id, run_id = %run.id, "Restore phase succeeded");
                Ok(Ok(()))
            }
            Some(Err(op)) => {
                warn!(
                    job_id = %job.id,
                    run_id = %run.id,
                    kind = %op.kind,
                    error = %op.message,
                    "Restore phase failed"
                );
                let message = format!("restore failed: {}", op);
                let entry = self
                    .entry(run, Phase::Restore, PhaseStatus::Failed, started, &message)
                    .with_output(&op.output)
                    .with_error(&op.message)
                    .with_artifact(artifact)
                    .with_failure(FailureReason::RestoreFailed);
                self.record_phase(run, entry).await?;
                Ok(Err(AttemptFailure {
                    reason: FailureReason::RestoreFailed,
                    message,
                    output: Some(op.output),
                }))
            }
        }
    }

    // ------------------------------------------------------------------
    // Terminal states
    // ------------------------------------------------------------------

    async fn finish_completed(&self, job: &mut Job, run: &mut Run) -> Result<()> {
        let now = self.now();
        run.complete(now)?;
        job.mark_completed(now, run.total_duration_ms(now));

        let summary = self.summary_entry(run, PhaseStatus::Success, now);
        self.phase_log.append(&summary).await?;
        self.runs.update(run).await?;
        self.registry.save_state(job).await?;

        info!(
            job_id = %job.id,
            run_id = %run.id,
            attempts = %run.attempt,
            duration_ms = %run.total_duration_ms(now),
            "Run completed"
        );

        self.notify(job, run, None).await;
        Ok(())
    }

    async fn finish_failed(&self, job: &mut Job, run: &mut Run, failure: AttemptFailure) -> Result<()> {
        let now = self.now();
        run.fail(failure.reason, failure.message.clone(), now)?;
        job.mark_failed(failure.reason, now, run.total_duration_ms(now));
        job.last_error = Some(truncate_chars(
            &failure.message,
            crate::domain::phase_log::MAX_ERROR_CHARS,
        ));

        // A run that never got past preparation keeps its single entry
        let only_preparation = !run.phase_results.is_empty()
            && run
                .phase_results
                .iter()
                .all(|p| p.phase == Phase::Preparation);
        if !only_preparation {
            let summary = self
                .summary_entry(run, failure.phase_status(), now)
                .with_error(&failure.message)
                .with_failure(failure.reason);
            self.phase_log.append(&summary).await?;
        }

        self.runs.update(run).await?;
        self.registry.save_state(job).await?;

        error!(
            job_id = %job.id,
            run_id = %run.id,
            reason = %failure.reason,
            attempts = %run.attempt,
            error = %failure.message,
            "Run failed"
        );

        self.notify(job, run, failure.output.as_deref()).await;
        Ok(())
    }

    /// Push the terminal state to the gateway when the job asks for it
    async fn notify(&self, job: &Job, run: &Run, last_output: Option<&str>) {
        if !job.notify_on_each_run {
            debug!(job_id = %job.id, run_id = %run.id, "Per-run notification disabled");
            return;
        }
        let Some(status) = run.terminal_status() else {
            return;
        };

        let notification = RunNotification::new(job, run, status, last_output, self.now());
        if let Err(e) = self.notifier.notify(&notification).await {
            warn!(job_id = %job.id, run_id = %run.id, error = %e, "Notification delivery failed");
        }
    }

    /// Fail a run as interrupted after an internal error or panic.
    ///
    /// Counts as a failed attempt and notifies like any other terminal failure.
    async fn abandon(&self, job_id: &str, run_id: &str, message: &str) {
        if let Err(e) = self.try_abandon(job_id, run_id, message).await {
            error!(job_id = %job_id, run_id = %run_id, error = %e, "Failed to record interrupted run");
        }
    }

    async fn try_abandon(&self, job_id: &str, run_id: &str, message: &str) -> Result<()> {
        let Some(mut run) = self.runs.find_by_id(run_id).await? else {
            return Ok(());
        };
        if run.is_terminal() {
            return Ok(());
        }

        let now = self.now();
        run.fail(FailureReason::Interrupted, message, now)?;
        let summary = self
            .summary_entry(&run, PhaseStatus::Failed, now)
            .with_error(message)
            .with_failure(FailureReason::Interrupted);
        self.phase_log.append(&summary).await?;
        self.runs.update(&run).await?;

        let Some(mut job) = self.registry.find_by_id(job_id).await? else {
            return Ok(());
        };
        job.record_failed_attempt(
            FailureReason::Interrupted,
            truncate_chars(message, crate::domain::phase_log::MAX_ERROR_CHARS),
            now,
        );
        job.mark_failed(FailureReason::Interrupted, now, run.total_duration_ms(now));
        self.registry.save_state(&job).await?;

        warn!(job_id = %job_id, run_id = %run_id, error = %message, "Run marked interrupted");
        self.notify(&job, &run, None).await;
        Ok(())
    }

    /// Whether `run_id` is executing in this process
    pub fn is_running_here(&self, run_id: &str) -> bool {
        self.active_runs().contains_key(run_id)
    }

    /// Forget the run's cancel handle and release its lease
    async fn finish(&self, lease: &LeaseRecord) {
        self.active_runs().remove(&lease.run_id);
        if let Err(e) = self.leases.release(lease).await {
            error!(job_id = %lease.job_id, run_id = %lease.run_id, error = %e, "Failed to release lease");
        }
    }

    // ------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------

    /// Request cancellation of a run executing in this process.
    ///
    /// Returns `false` when the run is already terminal.
    pub async fn cancel_run(&self, run_id: &str) -> Result<bool> {
        let signalled = match self.active_runs().get(run_id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        };
        if signalled {
            info!(run_id = %run_id, "Cancellation requested");
            return Ok(true);
        }

        match self.runs.find_by_id(run_id).await? {
            None => Err(AppError::NotFound(format!("Run {}", run_id))),
            Some(run) if run.is_terminal() => Ok(false),
            Some(_) => Err(AppError::Conflict(format!(
                "Run {} is not executing in this process",
                run_id
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Phase log helpers
    // ------------------------------------------------------------------

    fn entry(
        &self,
        run: &Run,
        phase: Phase,
        status: PhaseStatus,
        started_at: i64,
        message: &str,
    ) -> PhaseLogEntry {
        PhaseLogEntry::new(
            run.id.clone(),
            run.job_id.clone(),
            run.attempt,
            phase,
            status,
            started_at,
            self.now(),
            message,
        )
    }

    async fn record_phase(&self, run: &mut Run, entry: PhaseLogEntry) -> Result<()> {
        self.phase_log.append(&entry).await?;
        run.push_phase_result(entry.phase, entry.status, entry.duration_ms);
        Ok(())
    }

    /// Run-level aggregate written once at the final terminal state
    fn summary_entry(&self, run: &Run, status: PhaseStatus, now: i64) -> PhaseLogEntry {
        let started = run.started_at.unwrap_or(run.created_at);
        let mut message = format!(
            "{} run {} after {} attempt(s) in {}",
            run.requested_mode,
            match status {
                PhaseStatus::Success => "completed",
                PhaseStatus::Failed => "failed",
                PhaseStatus::Cancelled => "cancelled",
            },
            run.attempt,
            format_duration(run.total_duration_ms(now))
        );
        for phase in [Phase::Backup, Phase::Restore] {
            if run.phase_results.iter().any(|p| p.phase == phase) {
                message.push_str(&format!(
                    " | {}: {}",
                    phase.as_str().to_lowercase(),
                    format_duration(run.phase_duration_ms(phase))
                ));
            }
        }

        let entry = PhaseLogEntry::new(
            run.id.clone(),
            run.job_id.clone(),
            run.attempt,
            Phase::Completion,
            status,
            started,
            now,
            message,
        );
        match run.artifact_ref_used.clone().or_else(|| run.artifact_ref_produced.clone()) {
            Some(artifact) => entry.with_artifact(artifact),
            None => entry,
        }
    }
}

/// `1h 02m 03s` / `4m 05s` / `6.7s`
pub fn format_duration(ms: i64) -> String {
    let secs = ms.max(0) / 1000;
    match secs {
        s if s >= 3600 => format!("{}h {:02}m {:02}s", s / 3600, (s % 3600) / 60, s % 60),
        s if s >= 60 => format!("{}m {:02}s", s / 60, s % 60),
        _ => format!("{:.1}s", ms.max(0) as f64 / 1000.0),
    }
}
