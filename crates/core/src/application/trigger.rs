// Trigger - manual run requests and the cron evaluation loop

use crate::application::orchestrator::constants::ERROR_RECOVERY_SLEEP_DURATION;
use crate::application::orchestrator::{Admission, CancelToken, Orchestrator, RejectReason};
use crate::application::recovery::RecoveryService;
use crate::domain::schedule::is_due;
use crate::domain::{CronSchedule, Job, RunId, RunMode, TriggerSource};
use crate::error::Result;
use crate::port::{JobRegistry, TimeProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Outcome of a run request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum TriggerDecision {
    Accepted { run_id: RunId },
    Rejected { reason: RejectReason },
}

/// Which run a job's schedules ask for at `now_millis`, if any.
///
/// The full schedule wins over the backup schedule when both are due. Fire
/// times older than `lookback_ms` are dropped rather than caught up.
pub fn due_mode(job: &Job, now_millis: i64, lookback_ms: i64) -> Result<Option<RunMode>> {
    if !job.is_active {
        return Ok(None);
    }
    let since = job
        .last_run_started_at
        .map_or(job.created_at, |started| started.max(job.created_at));

    for (expr, mode) in [
        (&job.schedule, RunMode::Full),
        (&job.backup_schedule, RunMode::BackupOnly),
    ] {
        if let Some(expr) = expr {
            let schedule = CronSchedule::parse(expr)?;
            if is_due(&schedule, now_millis, since, lookback_ms) {
                return Ok(Some(mode));
            }
        }
    }
    Ok(None)
}

pub struct Trigger {
    orchestrator: Arc<Orchestrator>,
    registry: Arc<dyn JobRegistry>,
    time_provider: Arc<dyn TimeProvider>,
    tick: Duration,
    recovery: Option<Arc<RecoveryService>>,
}

impl Trigger {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        registry: Arc<dyn JobRegistry>,
        time_provider: Arc<dyn TimeProvider>,
        tick: Duration,
    ) -> Self {
        Self {
            orchestrator,
            registry,
            time_provider,
            tick,
            recovery: None,
        }
    }

    /// Sweep runs with a lapsed lease on every tick
    pub fn with_recovery(mut self, recovery: Arc<RecoveryService>) -> Self {
        self.recovery = Some(recovery);
        self
    }

    /// Two ticks of slack so a late tick still sees its fire time
    fn lookback_ms(&self) -> i64 {
        (self.tick.as_millis() as i64).saturating_mul(2)
    }

    /// Operator request: start a run now, or reject it explicitly
    ///
    /// # Errors
    /// - `AppError::NotFound` if the job does not exist
    pub async fn request_run(&self, job_id: &str, mode: RunMode) -> Result<TriggerDecision> {
        self.submit(job_id, mode, TriggerSource::Manual).await
    }

    async fn submit(
        &self,
        job_id: &str,
        mode: RunMode,
        trigger: TriggerSource,
    ) -> Result<TriggerDecision> {
        match self.orchestrator.admit(job_id, mode, trigger).await? {
            Admission::Accepted(admitted) => {
                let run_id = admitted.run_id().to_string();
                self.orchestrator.spawn(admitted);
                Ok(TriggerDecision::Accepted { run_id })
            }
            Admission::Rejected(reason) => Ok(TriggerDecision::Rejected { reason }),
        }
    }

    /// Evaluate every scheduled job once; returns the number of runs started
    pub async fn tick(&self) -> Result<usize> {
        if let Some(recovery) = &self.recovery {
            let orchestrator = &self.orchestrator;
            if let Err(e) = recovery
                .recover_orphaned_runs(|run_id| orchestrator.is_running_here(run_id))
                .await
            {
                warn!(error = %e, "Orphaned run sweep failed");
            }
        }

        let now = self.time_provider.now_millis();
        let lookback = self.lookback_ms();
        let mut started = 0;

        for job in self.registry.list_scheduled().await? {
            let mode = match due_mode(&job, now, lookback) {
                Ok(Some(mode)) => mode,
                Ok(None) => continue,
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Invalid schedule, skipping job");
                    continue;
                }
            };

            match self.submit(&job.id, mode, TriggerSource::Scheduled).await {
                Ok(TriggerDecision::Accepted { run_id }) => {
                    info!(job_id = %job.id, run_id = %run_id, mode = %mode, "Scheduled run started");
                    started += 1;
                }
                Ok(TriggerDecision::Rejected { reason }) => {
                    info!(
                        job_id = %job.id,
                        mode = %mode,
                        reason = %reason,
                        "Scheduled run skipped"
                    );
                }
                Err(e) => error!(job_id = %job.id, error = %e, "Failed to start scheduled run"),
            }
        }
        Ok(started)
    }

    /// Evaluate schedules every tick until shutdown
    pub async fn run(&self, mut shutdown: CancelToken) -> Result<()> {
        info!(tick_secs = %self.tick.as_secs(), "Trigger loop started");
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            let pause = match self.tick().await {
                Ok(started) => {
                    debug!(started = %started, "Schedule tick finished");
                    self.tick
                }
                Err(e) => {
                    error!("Schedule tick failed: {}", e);
                    ERROR_RECOVERY_SLEEP_DURATION
                }
            };
            tokio::select! {
                _ = sleep(pause) => {},
                _ = shutdown.cancelled() => {
                    info!("Trigger loop interrupted");
                    break;
                }
            }
        }
        info!("Trigger loop stopped");
        Ok(())
    }
}
