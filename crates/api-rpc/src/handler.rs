//! RPC Method Handlers
//!
//! Thin adapters from RPC parameters to the application services.

use crate::error::to_rpc_error;
use crate::types::{
    CancelRunParams, CancelRunResponse, DeleteJobResponse, HostListResponse, JobIdParams,
    JobListResponse, RunListParams, RunListResponse, RunLogParams, RunLogResponse,
    RunReportParams, RunReportResponse, RunRequestParams, UpdateJobParams, UpsertHostParams,
};
use ferry_core::application::{
    CreateJobRequest, JobConfigService, JobStatusView, Orchestrator, StatusQuery, Trigger,
    TriggerDecision,
};
use ferry_core::domain::{HostEndpoint, Job};
use jsonrpsee::types::ErrorObjectOwned;
use std::sync::Arc;
use tracing::info;

type RpcResult<T> = Result<T, ErrorObjectOwned>;

/// RPC Handler with injected services
pub struct RpcHandler {
    trigger: Arc<Trigger>,
    orchestrator: Arc<Orchestrator>,
    status: Arc<StatusQuery>,
    jobs: Arc<JobConfigService>,
}

impl RpcHandler {
    pub fn new(
        trigger: Arc<Trigger>,
        orchestrator: Arc<Orchestrator>,
        status: Arc<StatusQuery>,
        jobs: Arc<JobConfigService>,
    ) -> Self {
        Self {
            trigger,
            orchestrator,
            status,
            jobs,
        }
    }

    /// run.request.v1
    pub async fn request_run(&self, params: RunRequestParams) -> RpcResult<TriggerDecision> {
        let decision = self
            .trigger
            .request_run(&params.job_id, params.mode)
            .await
            .map_err(to_rpc_error)?;
        info!(job_id = %params.job_id, mode = %params.mode, decision = ?decision, "Run requested");
        Ok(decision)
    }

    /// run.cancel.v1
    pub async fn cancel_run(&self, params: CancelRunParams) -> RpcResult<CancelRunResponse> {
        let cancelled = self
            .orchestrator
            .cancel_run(&params.run_id)
            .await
            .map_err(to_rpc_error)?;
        Ok(CancelRunResponse {
            run_id: params.run_id,
            cancelled,
        })
    }

    /// run.log.v1
    pub async fn run_log(&self, params: RunLogParams) -> RpcResult<RunLogResponse> {
        let entries = self
            .status
            .run_log(&params.run_id)
            .await
            .map_err(to_rpc_error)?;
        Ok(RunLogResponse {
            run_id: params.run_id,
            entries,
        })
    }

    /// run.list.v1
    pub async fn list_runs(&self, params: RunListParams) -> RpcResult<RunListResponse> {
        let runs = self
            .status
            .list_runs(&params.job_id, params.limit)
            .await
            .map_err(to_rpc_error)?;
        Ok(RunListResponse {
            job_id: params.job_id,
            runs,
        })
    }

    /// run.report.v1
    pub async fn run_report(&self, params: RunReportParams) -> RpcResult<RunReportResponse> {
        let runs = self
            .status
            .terminal_runs_since(params.since)
            .await
            .map_err(to_rpc_error)?;
        Ok(RunReportResponse {
            since: params.since,
            runs,
        })
    }

    /// job.status.v1
    pub async fn job_status(&self, params: JobIdParams) -> RpcResult<JobStatusView> {
        self.status
            .job_status(&params.job_id)
            .await
            .map_err(to_rpc_error)
    }

    /// job.create.v1
    pub async fn create_job(&self, params: CreateJobRequest) -> RpcResult<Job> {
        self.jobs.create(params).await.map_err(to_rpc_error)
    }

    /// job.update.v1
    pub async fn update_job(&self, params: UpdateJobParams) -> RpcResult<Job> {
        self.jobs
            .update(&params.job_id, params.patch)
            .await
            .map_err(to_rpc_error)
    }

    /// job.get.v1
    pub async fn get_job(&self, params: JobIdParams) -> RpcResult<Job> {
        self.jobs.get(&params.job_id).await.map_err(to_rpc_error)
    }

    /// job.list.v1
    pub async fn list_jobs(&self) -> RpcResult<JobListResponse> {
        let jobs = self.jobs.list().await.map_err(to_rpc_error)?;
        Ok(JobListResponse { jobs })
    }

    /// job.delete.v1
    pub async fn delete_job(&self, params: JobIdParams) -> RpcResult<DeleteJobResponse> {
        self.jobs
            .delete(&params.job_id)
            .await
            .map_err(to_rpc_error)?;
        Ok(DeleteJobResponse {
            job_id: params.job_id,
            deleted: true,
        })
    }

    /// host.upsert.v1
    pub async fn upsert_host(&self, params: UpsertHostParams) -> RpcResult<HostEndpoint> {
        self.jobs
            .upsert_host(params.into_endpoint())
            .await
            .map_err(to_rpc_error)
    }

    /// host.list.v1
    pub async fn list_hosts(&self) -> RpcResult<HostListResponse> {
        let hosts = self.jobs.list_hosts().await.map_err(to_rpc_error)?;
        Ok(HostListResponse { hosts })
    }
}
