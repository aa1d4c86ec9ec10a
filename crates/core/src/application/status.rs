// Status queries - read-only views over jobs, runs and the phase log

use crate::application::orchestrator::constants::{DEFAULT_RUN_LIST_LIMIT, MAX_RUN_LIST_LIMIT};
use crate::domain::{
    ArtifactRef, FailureReason, Job, JobId, Phase, PhaseLogEntry, Run, RunId, RunMode, RunStatus,
    TriggerSource,
};
use crate::error::{AppError, Result};
use crate::port::{JobRegistry, PhaseLogStore, RunStore, TimeProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Run summary with per-phase durations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub job_id: JobId,
    pub sequence: i64,
    pub mode: RunMode,
    pub trigger: TriggerSource,
    pub status: RunStatus,
    pub failure: Option<FailureReason>,
    pub error_message: Option<String>,
    pub attempts: u32,
    pub artifact_ref_produced: Option<ArtifactRef>,
    pub artifact_ref_used: Option<ArtifactRef>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub next_attempt_at: Option<i64>,
    pub duration_ms: i64,
    pub backup_duration_ms: Option<i64>,
    pub restore_duration_ms: Option<i64>,
}

impl RunSummary {
    pub fn from_run(run: &Run, now_millis: i64) -> Self {
        let phase_total = |phase: Phase| {
            run.phase_results
                .iter()
                .any(|p| p.phase == phase)
                .then(|| run.phase_duration_ms(phase))
        };
        Self {
            run_id: run.id.clone(),
            job_id: run.job_id.clone(),
            sequence: run.sequence,
            mode: run.requested_mode,
            trigger: run.trigger,
            status: run.status,
            failure: run.failure,
            error_message: run.error_message.clone(),
            attempts: run.attempt,
            artifact_ref_produced: run.artifact_ref_produced.clone(),
            artifact_ref_used: run.artifact_ref_used.clone(),
            created_at: run.created_at,
            started_at: run.started_at,
            finished_at: run.finished_at,
            next_attempt_at: run.next_attempt_at,
            duration_ms: run.total_duration_ms(now_millis),
            backup_duration_ms: phase_total(Phase::Backup),
            restore_duration_ms: phase_total(Phase::Restore),
        }
    }
}

/// `getJobStatus` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub name: String,
    pub is_active: bool,
    pub current_status: RunStatus,
    pub last_failure: Option<FailureReason>,
    pub last_error: Option<String>,
    pub last_artifact_ref: Option<ArtifactRef>,
    pub last_backup_at: Option<i64>,
    pub last_restore_at: Option<i64>,
    pub consecutive_failure_count: u32,
    pub run_count: u32,
    pub error_count: u32,
    pub last_run: Option<RunSummary>,
}

impl JobStatusView {
    fn new(job: Job, last_run: Option<RunSummary>) -> Self {
        Self {
            job_id: job.id,
            name: job.name,
            is_active: job.is_active,
            current_status: job.current_status,
            last_failure: job.last_failure,
            last_error: job.last_error,
            last_artifact_ref: job.last_artifact_ref,
            last_backup_at: job.last_backup_at,
            last_restore_at: job.last_restore_at,
            consecutive_failure_count: job.consecutive_failure_count,
            run_count: job.run_count,
            error_count: job.error_count,
            last_run,
        }
    }
}

pub struct StatusQuery {
    registry: Arc<dyn JobRegistry>,
    runs: Arc<dyn RunStore>,
    phase_log: Arc<dyn PhaseLogStore>,
    time_provider: Arc<dyn TimeProvider>,
}

impl StatusQuery {
    pub fn new(
        registry: Arc<dyn JobRegistry>,
        runs: Arc<dyn RunStore>,
        phase_log: Arc<dyn PhaseLogStore>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            registry,
            runs,
            phase_log,
            time_provider,
        }
    }

    async fn require_job(&self, job_id: &str) -> Result<Job> {
        self.registry
            .find_by_id(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job {}", job_id)))
    }

    pub async fn job_status(&self, job_id: &str) -> Result<JobStatusView> {
        let job = self.require_job(job_id).await?;
        let now = self.time_provider.now_millis();
        let last_run = self
            .runs
            .latest_for_job(job_id)
            .await?
            .map(|run| RunSummary::from_run(&run, now));
        Ok(JobStatusView::new(job, last_run))
    }

    /// Phase log of a run in append order
    pub async fn run_log(&self, run_id: &str) -> Result<Vec<PhaseLogEntry>> {
        if self.runs.find_by_id(run_id).await?.is_none() {
            return Err(AppError::NotFound(format!("Run {}", run_id)));
        }
        self.phase_log.list_for_run(run_id).await
    }

    pub async fn get_run(&self, run_id: &str) -> Result<RunSummary> {
        let run = self
            .runs
            .find_by_id(run_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Run {}", run_id)))?;
        Ok(RunSummary::from_run(&run, self.time_provider.now_millis()))
    }

    /// Most recent runs of a job first; `limit` defaults to 20, capped at 500
    pub async fn list_runs(&self, job_id: &str, limit: Option<u32>) -> Result<Vec<RunSummary>> {
        self.require_job(job_id).await?;
        let limit = limit
            .unwrap_or(DEFAULT_RUN_LIST_LIMIT)
            .clamp(1, MAX_RUN_LIST_LIMIT);
        let now = self.time_provider.now_millis();
        Ok(self
            .runs
            .list_for_job(job_id, limit)
            .await?
            .iter()
            .map(|run| RunSummary::from_run(run, now))
            .collect())
    }

    /// Terminal runs finished at or after `since_millis`, for the periodic report
    pub async fn terminal_runs_since(&self, since_millis: i64) -> Result<Vec<RunSummary>> {
        let now = self.time_provider.now_millis();
        Ok(self
            .runs
            .list_terminal_since(since_millis)
            .await?
            .iter()
            .map(|run| RunSummary::from_run(run, now))
            .collect())
    }
}
