// Job Configuration Service - job and host directory management

pub mod create;
pub mod update;


pub use create::CreateJobRequest;
pub use update::UpdateJobRequest;

use crate::domain::{HostEndpoint, Job, Phase};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, JobRegistry, PhaseLogStore, TimeProvider, TopologyProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Job with the durations of its latest backup and restore phases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobListItem {
    #[serde(flatten)]
    pub job: Job,
    pub last_backup_duration_ms: Option<i64>,
    pub last_restore_duration_ms: Option<i64>,
}

pub struct JobConfigService {
    registry: Arc<dyn JobRegistry>,
    phase_log: Arc<dyn PhaseLogStore>,
    topology: Arc<dyn TopologyProvider>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
}

impl JobConfigService {
    pub fn new(
        registry: Arc<dyn JobRegistry>,
        phase_log: Arc<dyn PhaseLogStore>,
        topology: Arc<dyn TopologyProvider>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            registry,
            phase_log,
            topology,
            id_provider,
            time_provider,
        }
    }

    /// Create a new job
    pub async fn create(&self, req: CreateJobRequest) -> Result<Job> {
        let job = create::execute(
            self.registry.as_ref(),
            self.topology.as_ref(),
            self.id_provider.as_ref(),
            self.time_provider.as_ref(),
            req,
        )
        .await?;
        info!(job_id = %job.id, name = %job.name, "Job created");
        Ok(job)
    }

    /// Patch a job's configuration
    ///
    /// # Errors
    /// - `AppError::NotFound` if the job does not exist
    /// - `AppError::Conflict` while a run is in flight
    pub async fn update(&self, job_id: &str, req: UpdateJobRequest) -> Result<Job> {
        let mut job = self.get(job_id).await?;
        if job.has_run_in_flight() {
            return Err(AppError::Conflict(format!(
                "Job {} has a run in flight ({})",
                job_id, job.current_status
            )));
        }

        let touches_topology = req.touches_topology();
        req.apply(&mut job, self.time_provider.now_millis());
        job.validate()?;
        if touches_topology {
            create::check_topology(self.topology.as_ref(), &job).await?;
        }

        self.registry.update_config(&job).await?;
        info!(job_id = %job.id, "Job updated");
        self.get(job_id).await
    }

    pub async fn get(&self, job_id: &str) -> Result<Job> {
        self.registry
            .find_by_id(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job {}", job_id)))
    }

    pub async fn list(&self) -> Result<Vec<JobListItem>> {
        let mut items = Vec::new();
        for job in self.registry.list().await? {
            let last_backup_duration_ms = self
                .phase_log
                .latest_for_job(&job.id, Phase::Backup)
                .await?
                .map(|e| e.duration_ms);
            let last_restore_duration_ms = self
                .phase_log
                .latest_for_job(&job.id, Phase::Restore)
                .await?
                .map(|e| e.duration_ms);
            items.push(JobListItem {
                job,
                last_backup_duration_ms,
                last_restore_duration_ms,
            });
        }
        Ok(items)
    }

    /// Delete a job with its runs and phase logs
    pub async fn delete(&self, job_id: &str) -> Result<()> {
        self.registry.delete(job_id).await?;
        info!(job_id = %job_id, "Job deleted");
        Ok(())
    }

    /// Register or replace a host record
    pub async fn upsert_host(&self, mut host: HostEndpoint) -> Result<HostEndpoint> {
        host.host_ref = host.host_ref.trim().to_string();
        host.validate()?;
        host.updated_at = self.time_provider.now_millis();
        self.topology.upsert(&host).await?;
        info!(host_ref = %host.host_ref, hostname = %host.hostname, "Host registered");
        Ok(host)
    }

    pub async fn list_hosts(&self) -> Result<Vec<HostEndpoint>> {
        self.topology.list().await
    }
}
