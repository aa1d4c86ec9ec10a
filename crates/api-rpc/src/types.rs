//! RPC Request/Response Types
//!
//! Defines the JSON-RPC method parameters and results.

use ferry_core::application::{JobListItem, RunSummary, UpdateJobRequest};
use ferry_core::domain::host::{DEFAULT_SSH_PORT, DEFAULT_SSH_USER};
use ferry_core::domain::{
    Capabilities, HostEndpoint, HostRef, JobId, PhaseLogEntry, RunId, RunMode,
};
use serde::{Deserialize, Serialize};

/// run.request.v1 - Start a run now
#[derive(Debug, Serialize, Deserialize)]
pub struct RunRequestParams {
    pub job_id: JobId,
    #[serde(default)]
    pub mode: RunMode,
}

/// run.cancel.v1 - Cancel an active run
#[derive(Debug, Serialize, Deserialize)]
pub struct CancelRunParams {
    pub run_id: RunId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRunResponse {
    pub run_id: RunId,
    pub cancelled: bool,
}

/// run.log.v1 - Phase log of a run
#[derive(Debug, Serialize, Deserialize)]
pub struct RunLogParams {
    pub run_id: RunId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLogResponse {
    pub run_id: RunId,
    pub entries: Vec<PhaseLogEntry>,
}

/// run.list.v1 - Recent runs of a job
#[derive(Debug, Serialize, Deserialize)]
pub struct RunListParams {
    pub job_id: JobId,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunListResponse {
    pub job_id: JobId,
    pub runs: Vec<RunSummary>,
}

/// run.report.v1 - Terminal runs since a timestamp (epoch ms)
#[derive(Debug, Serialize, Deserialize)]
pub struct RunReportParams {
    pub since: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReportResponse {
    pub since: i64,
    pub runs: Vec<RunSummary>,
}

/// job.status.v1 / job.get.v1 / job.delete.v1
#[derive(Debug, Serialize, Deserialize)]
pub struct JobIdParams {
    pub job_id: JobId,
}

/// job.update.v1 - Patch a job; absent fields keep their value
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateJobParams {
    pub job_id: JobId,
    #[serde(flatten)]
    pub patch: UpdateJobRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobListItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteJobResponse {
    pub job_id: JobId,
    pub deleted: bool,
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_ssh_user() -> String {
    DEFAULT_SSH_USER.to_string()
}

fn default_true() -> bool {
    true
}

/// host.upsert.v1 - Register or replace a host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertHostParams {
    pub host_ref: HostRef,
    pub hostname: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,
    #[serde(default)]
    pub ssh_key_path: Option<String>,
    #[serde(default)]
    pub datastore: Option<String>,
    #[serde(default = "default_true")]
    pub source_capable: bool,
    #[serde(default)]
    pub intermediary_capable: bool,
    #[serde(default = "default_true")]
    pub destination_capable: bool,
    #[serde(default = "default_true")]
    pub is_online: bool,
}

impl UpsertHostParams {
    /// `updated_at` is stamped by the service
    pub fn into_endpoint(self) -> HostEndpoint {
        HostEndpoint {
            host_ref: self.host_ref,
            hostname: self.hostname,
            ssh_port: self.ssh_port,
            ssh_user: self.ssh_user,
            ssh_key_path: self.ssh_key_path,
            datastore: self.datastore,
            capabilities: Capabilities {
                source: self.source_capable,
                intermediary: self.intermediary_capable,
                destination: self.destination_capable,
            },
            is_online: self.is_online,
            updated_at: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostListResponse {
    pub hosts: Vec<HostEndpoint>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_run_request_defaults_to_full() {
        let params: RunRequestParams = serde_json::from_value(json!({ "job_id": "job-1" })).unwrap();
        assert_eq!(params.mode, RunMode::Full);

        let params: RunRequestParams =
            serde_json::from_value(json!({ "job_id": "job-1", "mode": "restore-only" })).unwrap();
        assert_eq!(params.mode, RunMode::RestoreOnly);
    }

    #[test]
    fn test_update_params_flatten_patch() {
        let params: UpdateJobParams = serde_json::from_value(json!({
            "job_id": "job-1",
            "max_retries": 2,
            "is_active": false
        }))
        .unwrap();
        assert_eq!(params.job_id, "job-1");
        assert_eq!(params.patch.max_retries, Some(2));
        assert_eq!(params.patch.is_active, Some(false));
        assert!(params.patch.name.is_none());
    }

    #[test]
    fn test_upsert_host_defaults() {
        let params: UpsertHostParams =
            serde_json::from_value(json!({ "host_ref": "pve-a", "hostname": "10.0.0.1" })).unwrap();
        let host = params.into_endpoint();
        assert_eq!(host.ssh_port, 22);
        assert_eq!(host.ssh_user, "root");
        assert!(host.capabilities.source && host.capabilities.destination);
        assert!(!host.capabilities.intermediary);
        assert!(host.is_online);
    }
}
