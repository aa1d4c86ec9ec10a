// Run Domain Model - one execution (including retries) of a Job

use crate::domain::error::{DomainError, Result};
use crate::domain::job::{ArtifactRef, JobId};
use crate::domain::phase_log::{Phase, PhaseStatus};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Run ID (UUID v4)
pub type RunId = String;

/// Which phases a run executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    #[default]
    Full,
    BackupOnly,
    RestoreOnly,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Full => "full",
            RunMode::BackupOnly => "backup-only",
            RunMode::RestoreOnly => "restore-only",
        }
    }

    pub fn includes_backup(&self) -> bool {
        matches!(self, RunMode::Full | RunMode::BackupOnly)
    }

    pub fn includes_restore(&self) -> bool {
        matches!(self, RunMode::Full | RunMode::RestoreOnly)
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(RunMode::Full),
            "backup-only" => Ok(RunMode::BackupOnly),
            "restore-only" => Ok(RunMode::RestoreOnly),
            _ => Err(DomainError::UnknownVariant {
                kind: "run_mode",
                value: s.to_string(),
            }),
        }
    }
}

/// What caused a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerSource {
    Manual,
    Scheduled,
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerSource::Manual => write!(f, "MANUAL"),
            TriggerSource::Scheduled => write!(f, "SCHEDULED"),
        }
    }
}

impl FromStr for TriggerSource {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "MANUAL" => Ok(TriggerSource::Manual),
            "SCHEDULED" => Ok(TriggerSource::Scheduled),
            _ => Err(DomainError::UnknownVariant {
                kind: "trigger",
                value: s.to_string(),
            }),
        }
    }
}

/// Run state machine position (mirrored by `Job::current_status`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Idle,
    Preparing,
    BackingUp,
    Restoring,
    RetryPending,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            RunStatus::Preparing
                | RunStatus::BackingUp
                | RunStatus::Restoring
                | RunStatus::RetryPending
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Idle => "IDLE",
            RunStatus::Preparing => "PREPARING",
            RunStatus::BackingUp => "BACKING_UP",
            RunStatus::Restoring => "RESTORING",
            RunStatus::RetryPending => "RETRY_PENDING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
        }
    }

    /// States that count as "in flight" in storage queries
    pub const IN_FLIGHT: [RunStatus; 4] = [
        RunStatus::Preparing,
        RunStatus::BackingUp,
        RunStatus::Restoring,
        RunStatus::RetryPending,
    ];
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "IDLE" => Ok(RunStatus::Idle),
            "PREPARING" => Ok(RunStatus::Preparing),
            "BACKING_UP" => Ok(RunStatus::BackingUp),
            "RESTORING" => Ok(RunStatus::Restoring),
            "RETRY_PENDING" => Ok(RunStatus::RetryPending),
            "COMPLETED" => Ok(RunStatus::Completed),
            "FAILED" => Ok(RunStatus::Failed),
            _ => Err(DomainError::UnknownVariant {
                kind: "run_status",
                value: s.to_string(),
            }),
        }
    }
}

/// Failure category carried by `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    PreparationFailed,
    BackupFailed,
    NoArtifactAvailable,
    RestoreFailed,
    Cancelled,
    Interrupted,
}

impl FailureReason {
    /// Only remote phase failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureReason::BackupFailed | FailureReason::RestoreFailed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::PreparationFailed => "PREPARATION_FAILED",
            FailureReason::BackupFailed => "BACKUP_FAILED",
            FailureReason::NoArtifactAvailable => "NO_ARTIFACT_AVAILABLE",
            FailureReason::RestoreFailed => "RESTORE_FAILED",
            FailureReason::Cancelled => "CANCELLED",
            FailureReason::Interrupted => "INTERRUPTED",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureReason {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PREPARATION_FAILED" => Ok(FailureReason::PreparationFailed),
            "BACKUP_FAILED" => Ok(FailureReason::BackupFailed),
            "NO_ARTIFACT_AVAILABLE" => Ok(FailureReason::NoArtifactAvailable),
            "RESTORE_FAILED" => Ok(FailureReason::RestoreFailed),
            "CANCELLED" => Ok(FailureReason::Cancelled),
            "INTERRUPTED" => Ok(FailureReason::Interrupted),
            _ => Err(DomainError::UnknownVariant {
                kind: "failure_reason",
                value: s.to_string(),
            }),
        }
    }
}

/// Final outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalStatus {
    Completed,
    Failed(FailureReason),
}

impl std::fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminalStatus::Completed => write!(f, "COMPLETED"),
            TerminalStatus::Failed(reason) => write!(f, "FAILED({})", reason),
        }
    }
}

/// Outcome of one concluded phase within one attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseOutcome {
    pub attempt: u32,
    pub phase: Phase,
    pub status: PhaseStatus,
    pub duration_ms: i64,
}

/// Run entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub job_id: JobId,
    /// Monotonic per job, assigned by the run store
    pub sequence: i64,
    pub requested_mode: RunMode,
    pub trigger: TriggerSource,
    pub status: RunStatus,
    pub failure: Option<FailureReason>,
    pub error_message: Option<String>,
    pub attempt: u32,
    pub artifact_ref_produced: Option<ArtifactRef>,
    pub artifact_ref_used: Option<ArtifactRef>,
    pub phase_results: Vec<PhaseOutcome>,

    pub created_at: i64, // epoch ms
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub next_attempt_at: Option<i64>,
}

impl Run {
    pub fn new(
        id: impl Into<String>,
        job_id: impl Into<String>,
        requested_mode: RunMode,
        trigger: TriggerSource,
        created_at: i64,
    ) -> Self {
        Self {
            id: id.into(),
            job_id: job_id.into(),
            sequence: 0,
            requested_mode,
            trigger,
            status: RunStatus::Idle,
            failure: None,
            error_message: None,
            attempt: 0,
            artifact_ref_produced: None,
            artifact_ref_used: None,
            phase_results: Vec::new(),
            created_at,
            started_at: None,
            finished_at: None,
            next_attempt_at: None,
        }
    }

    fn transition_error(&self, to: &str) -> DomainError {
        DomainError::InvalidStateTransition {
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `Idle | RetryPending -> Preparing`, starting a new attempt
    pub fn begin_attempt(&mut self, now_millis: i64) -> Result<()> {
        if !matches!(self.status, RunStatus::Idle | RunStatus::RetryPending) {
            return Err(self.transition_error("PREPARING"));
        }
        self.status = RunStatus::Preparing;
        self.attempt += 1;
        self.started_at.get_or_insert(now_millis);
        self.next_attempt_at = None;
        self.failure = None;
        self.error_message = None;
        // A new attempt produces its own artifact
        self.artifact_ref_produced = None;
        self.artifact_ref_used = None;
        Ok(())
    }

    /// `Preparing -> BackingUp`
    pub fn enter_backup(&mut self) -> Result<()> {
        if self.status != RunStatus::Preparing || !self.requested_mode.includes_backup() {
            return Err(self.transition_error("BACKING_UP"));
        }
        self.status = RunStatus::BackingUp;
        Ok(())
    }

    /// Record the artifact returned by a successful backup call
    pub fn record_backup_artifact(&mut self, artifact: ArtifactRef) -> Result<()> {
        if self.status != RunStatus::BackingUp {
            return Err(self.transition_error("BACKING_UP"));
        }
        self.artifact_ref_produced = Some(artifact);
        Ok(())
    }

    /// `BackingUp -> Restoring` (full) or `Preparing -> Restoring` (restore-only)
    ///
    /// In full mode the artifact must be the one this attempt's backup produced.
    pub fn enter_restore(&mut self, artifact: ArtifactRef) -> Result<()> {
        let allowed = match self.requested_mode {
            RunMode::Full => {
                self.status == RunStatus::BackingUp
                    && self.artifact_ref_produced.as_ref() == Some(&artifact)
            }
            RunMode::RestoreOnly => self.status == RunStatus::Preparing,
            RunMode::BackupOnly => false,
        };
        if !allowed {
            return Err(self.transition_error("RESTORING"));
        }
        self.status = RunStatus::Restoring;
        self.artifact_ref_used = Some(artifact);
        Ok(())
    }

    /// `Restoring -> Completed`, or `BackingUp -> Completed` in backup-only mode
    pub fn complete(&mut self, now_millis: i64) -> Result<()> {
        let allowed = match self.status {
            RunStatus::Restoring => true,
            RunStatus::BackingUp => {
                self.requested_mode == RunMode::BackupOnly && self.artifact_ref_produced.is_some()
            }
            _ => false,
        };
        if !allowed {
            return Err(self.transition_error("COMPLETED"));
        }
        self.status = RunStatus::Completed;
        self.finished_at = Some(now_millis);
        Ok(())
    }

    /// Failed attempt that will be retried after `next_attempt_at`
    pub fn schedule_retry(
        &mut self,
        reason: FailureReason,
        message: impl Into<String>,
        next_attempt_at: i64,
    ) -> Result<()> {
        if !matches!(
            self.status,
            RunStatus::Preparing | RunStatus::BackingUp | RunStatus::Restoring
        ) || !reason.is_retryable()
        {
            return Err(self.transition_error("RETRY_PENDING"));
        }
        self.status = RunStatus::RetryPending;
        self.failure = Some(reason);
        self.error_message = Some(message.into());
        self.next_attempt_at = Some(next_attempt_at);
        Ok(())
    }

    /// Any non-terminal state -> `Failed(reason)`
    pub fn fail(
        &mut self,
        reason: FailureReason,
        message: impl Into<String>,
        now_millis: i64,
    ) -> Result<()> {
        if self.is_terminal() {
            return Err(self.transition_error("FAILED"));
        }
        self.status = RunStatus::Failed;
        self.failure = Some(reason);
        self.error_message = Some(message.into());
        self.next_attempt_at = None;
        self.finished_at = Some(now_millis);
        Ok(())
    }

    pub fn push_phase_result(&mut self, phase: Phase, status: PhaseStatus, duration_ms: i64) {
        self.phase_results.push(PhaseOutcome {
            attempt: self.attempt,
            phase,
            status,
            duration_ms,
        });
    }

    pub fn terminal_status(&self) -> Option<TerminalStatus> {
        match self.status {
            RunStatus::Completed => Some(TerminalStatus::Completed),
            RunStatus::Failed => Some(TerminalStatus::Failed(
                self.failure.unwrap_or(FailureReason::Interrupted),
            )),
            _ => None,
        }
    }

    /// Wall time from first attempt start to finish (or `now` while running)
    pub fn total_duration_ms(&self, now_millis: i64) -> i64 {
        match self.started_at {
            Some(started) => (self.finished_at.unwrap_or(now_millis) - started).max(0),
            None => 0,
        }
    }

    /// Summed duration of a phase across attempts
    pub fn phase_duration_ms(&self, phase: Phase) -> i64 {
        self.phase_results
            .iter()
            .filter(|p| p.phase == phase)
            .map(|p| p.duration_ms)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(mode: RunMode) -> Run {
        Run::new("run-1", "job-1", mode, TriggerSource::Manual, 1000)
    }

    #[test]
    fn test_full_run_happy_path() {
        let mut run = run(RunMode::Full);
        run.begin_attempt(1000).unwrap();
        assert_eq!(run.attempt, 1);
        run.enter_backup().unwrap();
        run.record_backup_artifact(ArtifactRef::new("snap-42")).unwrap();
        run.enter_restore(ArtifactRef::new("snap-42")).unwrap();
        run.complete(5000).unwrap();

        assert_eq!(run.terminal_status(), Some(TerminalStatus::Completed));
        assert_eq!(run.artifact_ref_used, Some(ArtifactRef::new("snap-42")));
        assert_eq!(run.total_duration_ms(9999), 4000);
    }

    #[test]
    fn test_full_run_cannot_restore_without_backup_artifact() {
        let mut run = run(RunMode::Full);
        run.begin_attempt(1000).unwrap();
        assert!(run.enter_restore(ArtifactRef::new("old")).is_err());

        run.enter_backup().unwrap();
        assert!(run.enter_restore(ArtifactRef::new("old")).is_err());

        run.record_backup_artifact(ArtifactRef::new("new")).unwrap();
        assert!(run.enter_restore(ArtifactRef::new("old")).is_err());
        assert!(run.enter_restore(ArtifactRef::new("new")).is_ok());
    }

    #[test]
    fn test_restore_only_skips_backup() {
        let mut run = run(RunMode::RestoreOnly);
        run.begin_attempt(1000).unwrap();
        assert!(run.enter_backup().is_err());
        run.enter_restore(ArtifactRef::new("snap-42")).unwrap();
        run.complete(2000).unwrap();
        assert!(run.artifact_ref_produced.is_none());
    }

    #[test]
    fn test_backup_only_completes_from_backing_up() {
        let mut run = run(RunMode::BackupOnly);
        run.begin_attempt(1000).unwrap();
        run.enter_backup().unwrap();
        assert!(run.complete(1500).is_err());
        run.record_backup_artifact(ArtifactRef::new("a")).unwrap();
        assert!(run.enter_restore(ArtifactRef::new("a")).is_err());
        run.complete(2000).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[test]
    fn test_retry_then_new_attempt() {
        let mut run = run(RunMode::Full);
        run.begin_attempt(1000).unwrap();
        run.enter_backup().unwrap();
        run.schedule_retry(FailureReason::BackupFailed, "exit 1", 61_000)
            .unwrap();
        assert_eq!(run.status, RunStatus::RetryPending);
        assert_eq!(run.next_attempt_at, Some(61_000));

        run.begin_attempt(61_000).unwrap();
        assert_eq!(run.attempt, 2);
        assert_eq!(run.started_at, Some(1000));
        assert!(run.failure.is_none());
    }

    #[test]
    fn test_non_retryable_reason_cannot_schedule_retry() {
        let mut run = run(RunMode::Full);
        run.begin_attempt(1000).unwrap();
        assert!(run
            .schedule_retry(FailureReason::PreparationFailed, "bad host", 2000)
            .is_err());
    }

    #[test]
    fn test_terminal_is_final() {
        let mut run = run(RunMode::Full);
        run.begin_attempt(1000).unwrap();
        run.fail(FailureReason::Cancelled, "operator", 1200).unwrap();
        assert_eq!(
            run.terminal_status(),
            Some(TerminalStatus::Failed(FailureReason::Cancelled))
        );
        assert!(run.fail(FailureReason::Interrupted, "again", 1300).is_err());
        assert!(run.begin_attempt(1400).is_err());
    }

    #[test]
    fn test_mode_round_trips_through_str() {
        for mode in [RunMode::Full, RunMode::BackupOnly, RunMode::RestoreOnly] {
            assert_eq!(mode.as_str().parse::<RunMode>().unwrap(), mode);
        }
        assert!("partial".parse::<RunMode>().is_err());
    }

    #[test]
    fn test_retryable_reasons() {
        assert!(FailureReason::BackupFailed.is_retryable());
        assert!(FailureReason::RestoreFailed.is_retryable());
        assert!(!FailureReason::NoArtifactAvailable.is_retryable());
        assert!(!FailureReason::Cancelled.is_retryable());
        assert!(!FailureReason::Interrupted.is_retryable());
    }
}
