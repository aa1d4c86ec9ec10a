// Recovery Job Domain Model

use crate::domain::error::{DomainError, Result};
use crate::domain::host::HostRef;
use crate::domain::run::{FailureReason, RunStatus};
use crate::domain::schedule::CronSchedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Job ID (UUID v4)
pub type JobId = String;

/// Virtual machine / container identifier on the hypervisor
pub type WorkloadId = u32;

pub const MAX_WORKLOAD_ID: WorkloadId = 999_999;
pub const MAX_JOB_NAME_LEN: usize = 200;
pub const MAX_RETRIES_LIMIT: u32 = 10;
pub const MIN_RETRY_DELAY_MINUTES: u32 = 1;
pub const MAX_RETRY_DELAY_MINUTES: u32 = 1440;
pub const DEFAULT_RETRY_DELAY_MINUTES: u32 = 15;
pub const DEFAULT_DATASTORE: &str = "datastore1";

/// Kind of workload being recovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkloadKind {
    Container,
    FullVirtualization,
}

impl std::fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkloadKind::Container => write!(f, "CONTAINER"),
            WorkloadKind::FullVirtualization => write!(f, "FULL_VIRTUALIZATION"),
        }
    }
}

impl FromStr for WorkloadKind {
    type Err = DomainError;

    /// Accepts the stored form as well as the hypervisor's short names
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "CONTAINER" | "LXC" => Ok(WorkloadKind::Container),
            "FULL_VIRTUALIZATION" | "FULL-VIRTUALIZATION" | "QEMU" | "VM" => {
                Ok(WorkloadKind::FullVirtualization)
            }
            _ => Err(DomainError::UnknownVariant {
                kind: "workload_kind",
                value: s.to_string(),
            }),
        }
    }
}

/// Consistency mode used by the backup tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupMode {
    #[default]
    Snapshot,
    Stop,
    Suspend,
}

impl BackupMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupMode::Snapshot => "snapshot",
            BackupMode::Stop => "stop",
            BackupMode::Suspend => "suspend",
        }
    }
}

impl std::fmt::Display for BackupMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "snapshot" => Ok(BackupMode::Snapshot),
            "stop" => Ok(BackupMode::Stop),
            "suspend" => Ok(BackupMode::Suspend),
            _ => Err(DomainError::UnknownVariant {
                kind: "backup_mode",
                value: s.to_string(),
            }),
        }
    }
}

/// Archive compression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Lzo,
    Gzip,
    #[default]
    Zstd,
}

impl Compression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Lzo => "lzo",
            Compression::Gzip => "gzip",
            Compression::Zstd => "zstd",
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Compression {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Compression::None),
            "lzo" => Ok(Compression::Lzo),
            "gzip" => Ok(Compression::Gzip),
            "zstd" => Ok(Compression::Zstd),
            _ => Err(DomainError::UnknownVariant {
                kind: "compression",
                value: s.to_string(),
            }),
        }
    }
}

/// Opaque reference to a backup artifact held by the intermediary store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Options passed through to the backup and restore tools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferOptions {
    pub backup_mode: BackupMode,
    pub compression: Compression,
    /// Overrides the intermediary host's datastore
    pub datastore: Option<String>,
    /// Name of the backup storage configured on source and destination
    pub storage_id: Option<String>,
    pub destination_workload_id: Option<WorkloadId>,
    pub destination_storage: Option<String>,
    pub start_after_restore: bool,
    pub unique_identity: bool,
    pub overwrite_existing: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            backup_mode: BackupMode::default(),
            compression: Compression::default(),
            datastore: None,
            storage_id: None,
            destination_workload_id: None,
            destination_storage: None,
            start_after_restore: false,
            unique_identity: true,
            overwrite_existing: true,
        }
    }
}

impl TransferOptions {
    /// Workload id on the destination (defaults to the source id)
    pub fn target_workload_id(&self, source: WorkloadId) -> WorkloadId {
        self.destination_workload_id.unwrap_or(source)
    }

    /// Effective datastore: job override, then the intermediary's, then the default
    pub fn effective_datastore<'a>(&'a self, intermediary_datastore: Option<&'a str>) -> &'a str {
        self.datastore
            .as_deref()
            .or(intermediary_datastore)
            .unwrap_or(DEFAULT_DATASTORE)
    }

    /// Storage id as known to the hypervisor hosts
    pub fn effective_storage_id(&self, intermediary_datastore: Option<&str>) -> String {
        match &self.storage_id {
            Some(id) => id.clone(),
            None => format!("ferry-{}", self.effective_datastore(intermediary_datastore)),
        }
    }
}

/// Recovery Job entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,

    // Topology
    pub source_host_ref: HostRef,
    pub intermediary_host_ref: HostRef,
    pub destination_host_ref: HostRef,

    // Target
    pub workload_id: WorkloadId,
    pub workload_kind: WorkloadKind,
    pub options: TransferOptions,

    // Policy
    pub is_active: bool,
    pub schedule: Option<String>,
    pub backup_schedule: Option<String>,
    pub max_retries: u32,
    pub retry_delay_minutes: u32,
    pub notify_on_each_run: bool,

    // State (written only while holding the job lease)
    pub current_status: RunStatus,
    pub last_failure: Option<FailureReason>,
    pub last_error: Option<String>,
    pub last_run_started_at: Option<i64>,
    pub last_run_finished_at: Option<i64>,
    pub last_artifact_ref: Option<ArtifactRef>,
    pub last_backup_at: Option<i64>,
    pub last_restore_at: Option<i64>,
    pub last_duration_ms: Option<i64>,
    pub consecutive_failure_count: u32,
    pub run_count: u32,
    pub error_count: u32,

    pub created_at: i64, // epoch ms
    pub updated_at: i64,
}

impl Job {
    /// Create a new Job
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        name: impl Into<String>,
        source_host_ref: impl Into<String>,
        intermediary_host_ref: impl Into<String>,
        destination_host_ref: impl Into<String>,
        workload_id: WorkloadId,
        workload_kind: WorkloadKind,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            source_host_ref: source_host_ref.into(),
            intermediary_host_ref: intermediary_host_ref.into(),
            destination_host_ref: destination_host_ref.into(),
            workload_id,
            workload_kind,
            options: TransferOptions::default(),
            is_active: true,
            schedule: None,
            backup_schedule: None,
            max_retries: 0,
            retry_delay_minutes: DEFAULT_RETRY_DELAY_MINUTES,
            notify_on_each_run: false,
            current_status: RunStatus::Idle,
            last_failure: None,
            last_error: None,
            last_run_started_at: None,
            last_run_finished_at: None,
            last_artifact_ref: None,
            last_backup_at: None,
            last_restore_at: None,
            last_duration_ms: None,
            consecutive_failure_count: 0,
            run_count: 0,
            error_count: 0,
            created_at,
            updated_at: created_at,
        }
    }

    /// Validate configuration fields
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;

        for (field, value) in [
            ("source_host_ref", &self.source_host_ref),
            ("intermediary_host_ref", &self.intermediary_host_ref),
            ("destination_host_ref", &self.destination_host_ref),
        ] {
            if value.trim().is_empty() {
                return Err(DomainError::ValidationError(format!(
                    "{} must not be empty",
                    field
                )));
            }
        }

        if self.source_host_ref == self.destination_host_ref {
            return Err(DomainError::ValidationError(
                "source and destination host must differ".to_string(),
            ));
        }

        validate_workload_id("workload_id", self.workload_id)?;
        if let Some(target) = self.options.destination_workload_id {
            validate_workload_id("destination_workload_id", target)?;
        }

        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(DomainError::ValidationError(format!(
                "max_retries must be between 0 and {}, got {}",
                MAX_RETRIES_LIMIT, self.max_retries
            )));
        }

        if !(MIN_RETRY_DELAY_MINUTES..=MAX_RETRY_DELAY_MINUTES).contains(&self.retry_delay_minutes)
        {
            return Err(DomainError::ValidationError(format!(
                "retry_delay_minutes must be between {} and {}, got {}",
                MIN_RETRY_DELAY_MINUTES, MAX_RETRY_DELAY_MINUTES, self.retry_delay_minutes
            )));
        }

        if let Some(expr) = &self.schedule {
            CronSchedule::parse(expr)?;
        }
        if let Some(expr) = &self.backup_schedule {
            CronSchedule::parse(expr)?;
        }

        Ok(())
    }

    /// Delay between failed attempts of one run
    pub fn retry_delay_ms(&self) -> i64 {
        i64::from(self.retry_delay_minutes) * 60_000
    }

    /// Whether a run currently owns this job
    pub fn has_run_in_flight(&self) -> bool {
        self.current_status.is_in_flight()
    }

    /// `host:workload` descriptor of the source side
    pub fn source_descriptor(&self) -> String {
        format!("{}:{}", self.source_host_ref, self.workload_id)
    }

    /// `host:workload` descriptor of the destination side
    pub fn destination_descriptor(&self) -> String {
        format!(
            "{}:{}",
            self.destination_host_ref,
            self.options.target_workload_id(self.workload_id)
        )
    }

    /// A run was admitted and now owns the job
    pub fn mark_run_started(&mut self, now_millis: i64) {
        self.current_status = RunStatus::Preparing;
        self.last_run_started_at = Some(now_millis);
        self.updated_at = now_millis;
    }

    pub fn mark_status(&mut self, status: RunStatus, now_millis: i64) {
        self.current_status = status;
        self.updated_at = now_millis;
    }

    /// Publish a freshly produced artifact (only after the backup phase is recorded)
    pub fn record_artifact(&mut self, artifact: ArtifactRef, now_millis: i64) {
        self.last_artifact_ref = Some(artifact);
        self.last_backup_at = Some(now_millis);
        self.updated_at = now_millis;
    }

    pub fn record_restore(&mut self, now_millis: i64) {
        self.last_restore_at = Some(now_millis);
        self.updated_at = now_millis;
    }

    /// One attempt failed (retry may still follow)
    pub fn record_failed_attempt(
        &mut self,
        reason: FailureReason,
        error: impl Into<String>,
        now_millis: i64,
    ) {
        self.consecutive_failure_count += 1;
        self.error_count += 1;
        self.last_failure = Some(reason);
        self.last_error = Some(error.into());
        self.updated_at = now_millis;
    }

    pub fn mark_completed(&mut self, now_millis: i64, duration_ms: i64) {
        self.current_status = RunStatus::Completed;
        self.consecutive_failure_count = 0;
        self.run_count += 1;
        self.last_failure = None;
        self.last_error = None;
        self.last_run_finished_at = Some(now_millis);
        self.last_duration_ms = Some(duration_ms);
        self.updated_at = now_millis;
    }

    pub fn mark_failed(&mut self, reason: FailureReason, now_millis: i64, duration_ms: i64) {
        self.current_status = RunStatus::Failed;
        self.last_failure = Some(reason);
        self.last_run_finished_at = Some(now_millis);
        self.last_duration_ms = Some(duration_ms);
        self.updated_at = now_millis;
    }
}

/// Name: 1-200 chars of letters, digits, space, `_` or `-`
pub fn validate_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_JOB_NAME_LEN {
        return Err(DomainError::ValidationError(format!(
            "name must be 1-{} characters",
            MAX_JOB_NAME_LEN
        )));
    }
    if let Some(bad) = trimmed
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == ' ' || *c == '_' || *c == '-'))
    {
        return Err(DomainError::ValidationError(format!(
            "name contains invalid character '{}'",
            bad
        )));
    }
    Ok(())
}

fn validate_workload_id(field: &str, id: WorkloadId) -> Result<()> {
    if id == 0 || id > MAX_WORKLOAD_ID {
        return Err(DomainError::ValidationError(format!(
            "{} must be between 1 and {}, got {}",
            field, MAX_WORKLOAD_ID, id
        )));
    }
    Ok(())
}
