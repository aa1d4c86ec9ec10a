// Phase Log Entry - append-only record of one concluded phase

use crate::domain::error::{DomainError, Result};
use crate::domain::job::{ArtifactRef, JobId};
use crate::domain::run::{FailureReason, RunId};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Captured tool output kept per entry
pub const MAX_CAPTURED_OUTPUT_CHARS: usize = 5000;

/// Error text kept per entry
pub const MAX_ERROR_CHARS: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Preparation,
    Backup,
    Restore,
    /// Run-level summary aggregating the other phases
    Completion,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Preparation => "PREPARATION",
            Phase::Backup => "BACKUP",
            Phase::Restore => "RESTORE",
            Phase::Completion => "COMPLETION",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PREPARATION" => Ok(Phase::Preparation),
            "BACKUP" => Ok(Phase::Backup),
            "RESTORE" => Ok(Phase::Restore),
            "COMPLETION" => Ok(Phase::Completion),
            _ => Err(DomainError::UnknownVariant {
                kind: "phase",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseStatus {
    Success,
    Failed,
    Cancelled,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Success => "SUCCESS",
            PhaseStatus::Failed => "FAILED",
            PhaseStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhaseStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SUCCESS" => Ok(PhaseStatus::Success),
            "FAILED" => Ok(PhaseStatus::Failed),
            "CANCELLED" => Ok(PhaseStatus::Cancelled),
            _ => Err(DomainError::UnknownVariant {
                kind: "phase_status",
                value: s.to_string(),
            }),
        }
    }
}

/// One row per concluded phase per attempt. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseLogEntry {
    /// Store-assigned ordering key (0 until appended)
    pub seq: i64,
    pub run_id: RunId,
    pub job_id: JobId,
    pub attempt: u32,
    pub phase: Phase,
    pub status: PhaseStatus,
    pub started_at: i64, // epoch ms
    pub ended_at: i64,
    pub duration_ms: i64,
    pub message: String,
    pub captured_output: Option<String>,
    pub error: Option<String>,
    pub artifact_ref: Option<ArtifactRef>,
    pub failure: Option<FailureReason>,
}

impl PhaseLogEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_id: impl Into<String>,
        job_id: impl Into<String>,
        attempt: u32,
        phase: Phase,
        status: PhaseStatus,
        started_at: i64,
        ended_at: i64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            seq: 0,
            run_id: run_id.into(),
            job_id: job_id.into(),
            attempt,
            phase,
            status,
            started_at,
            ended_at,
            duration_ms: (ended_at - started_at).max(0),
            message: message.into(),
            captured_output: None,
            error: None,
            artifact_ref: None,
            failure: None,
        }
    }

    /// Attach tool output, bounded to `MAX_CAPTURED_OUTPUT_CHARS`
    pub fn with_output(mut self, output: &str) -> Self {
        if !output.is_empty() {
            self.captured_output = Some(truncate_chars(output, MAX_CAPTURED_OUTPUT_CHARS));
        }
        self
    }

    /// Attach error text, bounded to `MAX_ERROR_CHARS`
    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(truncate_chars(error, MAX_ERROR_CHARS));
        self
    }

    pub fn with_artifact(mut self, artifact: ArtifactRef) -> Self {
        self.artifact_ref = Some(artifact);
        self
    }

    pub fn with_failure(mut self, reason: FailureReason) -> Self {
        self.failure = Some(reason);
        self
    }
}

/// Keep at most `max_chars` characters (never splits a code point)
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}
