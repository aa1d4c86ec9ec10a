// Create Job Use Case

use crate::domain::job::DEFAULT_RETRY_DELAY_MINUTES;
use crate::domain::{HostRole, Job, TransferOptions, WorkloadId, WorkloadKind};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, JobRegistry, TimeProvider, TopologyProvider};
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_retry_delay() -> u32 {
    DEFAULT_RETRY_DELAY_MINUTES
}

/// Create request (policy fields default like a fresh job)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobRequest {
    pub name: String,
    pub source_host_ref: String,
    pub intermediary_host_ref: String,
    pub destination_host_ref: String,
    pub workload_id: WorkloadId,
    pub workload_kind: WorkloadKind,

    #[serde(default)]
    pub options: TransferOptions,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub backup_schedule: Option<String>,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_minutes: u32,
    #[serde(default)]
    pub notify_on_each_run: bool,
}

/// Blank schedules mean "no schedule"
pub(super) fn normalize_schedule(expr: Option<String>) -> Option<String> {
    expr.map(|e| e.trim().to_string()).filter(|e| !e.is_empty())
}

/// Every host reference must be registered and capable of its role
pub(super) async fn check_topology(topology: &dyn TopologyProvider, job: &Job) -> Result<()> {
    for (host_ref, role) in [
        (&job.source_host_ref, HostRole::Source),
        (&job.intermediary_host_ref, HostRole::Intermediary),
        (&job.destination_host_ref, HostRole::Destination),
    ] {
        match topology.resolve(host_ref).await? {
            None => {
                return Err(AppError::Validation(format!(
                    "{} host '{}' is not registered",
                    role, host_ref
                )))
            }
            Some(host) if !host.supports(role) => {
                return Err(AppError::Validation(format!(
                    "host '{}' cannot act as {}",
                    host_ref, role
                )))
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Execute create use case
///
/// # Arguments
///
/// * `registry` - Job registry
/// * `topology` - Host directory used to check host references
/// * `id_provider` - ID generator (injected for determinism)
/// * `time_provider` - Time provider (injected for determinism)
/// * `req` - Create request
pub async fn execute(
    registry: &dyn JobRegistry,
    topology: &dyn TopologyProvider,
    id_provider: &dyn IdProvider,
    time_provider: &dyn TimeProvider,
    req: CreateJobRequest,
) -> Result<Job> {
    let mut job = Job::new(
        id_provider.generate_id(),
        time_provider.now_millis(),
        req.name.trim(),
        req.source_host_ref.trim(),
        req.intermediary_host_ref.trim(),
        req.destination_host_ref.trim(),
        req.workload_id,
        req.workload_kind,
    );
    job.options = req.options;
    job.is_active = req.is_active;
    job.schedule = normalize_schedule(req.schedule);
    job.backup_schedule = normalize_schedule(req.backup_schedule);
    job.max_retries = req.max_retries;
    job.retry_delay_minutes = req.retry_delay_minutes;
    job.notify_on_each_run = req.notify_on_each_run;

    job.validate()?;
    check_topology(topology, &job).await?;

    registry.insert(&job).await?;
    Ok(job)
}
