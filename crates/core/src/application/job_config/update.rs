// Update Job Use Case

use super::create::normalize_schedule;
use crate::domain::{Job, TransferOptions, WorkloadId, WorkloadKind};
use serde::{Deserialize, Serialize};

/// Partial update; absent fields keep their value.
///
/// An empty `schedule`/`backup_schedule` string clears the schedule. Changing
/// what is backed up (source, intermediary, workload) forgets the last
/// artifact, so restore-only runs need a fresh backup first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateJobRequest {
    pub name: Option<String>,
    pub source_host_ref: Option<String>,
    pub intermediary_host_ref: Option<String>,
    pub destination_host_ref: Option<String>,
    pub workload_id: Option<WorkloadId>,
    pub workload_kind: Option<WorkloadKind>,
    pub options: Option<TransferOptions>,
    pub is_active: Option<bool>,
    pub schedule: Option<String>,
    pub backup_schedule: Option<String>,
    pub max_retries: Option<u32>,
    pub retry_delay_minutes: Option<u32>,
    pub notify_on_each_run: Option<bool>,
}

impl UpdateJobRequest {
    /// Whether any host reference changes
    pub fn touches_topology(&self) -> bool {
        self.source_host_ref.is_some()
            || self.intermediary_host_ref.is_some()
            || self.destination_host_ref.is_some()
    }

    /// Apply the patch to `job`
    pub fn apply(self, job: &mut Job, now_millis: i64) {
        let previous_target = backup_target(job);
        if let Some(name) = self.name {
            job.name = name.trim().to_string();
        }
        if let Some(host_ref) = self.source_host_ref {
            job.source_host_ref = host_ref.trim().to_string();
        }
        if let Some(host_ref) = self.intermediary_host_ref {
            job.intermediary_host_ref = host_ref.trim().to_string();
        }
        if let Some(host_ref) = self.destination_host_ref {
            job.destination_host_ref = host_ref.trim().to_string();
        }
        if let Some(id) = self.workload_id {
            job.workload_id = id;
        }
        if let Some(kind) = self.workload_kind {
            job.workload_kind = kind;
        }
        if let Some(options) = self.options {
            job.options = options;
        }
        if let Some(active) = self.is_active {
            job.is_active = active;
        }
        if self.schedule.is_some() {
            job.schedule = normalize_schedule(self.schedule);
        }
        if self.backup_schedule.is_some() {
            job.backup_schedule = normalize_schedule(self.backup_schedule);
        }
        if let Some(retries) = self.max_retries {
            job.max_retries = retries;
        }
        if let Some(delay) = self.retry_delay_minutes {
            job.retry_delay_minutes = delay;
        }
        if let Some(notify) = self.notify_on_each_run {
            job.notify_on_each_run = notify;
        }
        if backup_target(job) != previous_target {
            job.last_artifact_ref = None;
        }
        job.updated_at = now_millis;
    }
}

fn backup_target(job: &Job) -> (String, String, WorkloadId, WorkloadKind) {
    (
        job.source_host_ref.clone(),
        job.intermediary_host_ref.clone(),
        job.workload_id,
        job.workload_kind,
    )
}
