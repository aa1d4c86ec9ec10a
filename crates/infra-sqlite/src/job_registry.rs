// SQLite JobRegistry Implementation

use crate::error::{column_u32, map_sqlx_error, IN_FLIGHT_SQL};
use async_trait::async_trait;
use ferry_core::domain::{
    ArtifactRef, FailureReason, Job, RunStatus, TransferOptions, WorkloadKind,
};
use ferry_core::error::{AppError, Result};
use ferry_core::port::JobRegistry;
use sqlx::SqlitePool;

pub struct SqliteJobRegistry {
    pool: SqlitePool,
}

impl SqliteJobRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(count > 0)
    }

    /// Zero rows touched by a guarded write: missing job or run in flight
    async fn guard_failure(&self, id: &str) -> AppError {
        match self.exists(id).await {
            Ok(true) => AppError::Conflict(format!("Job {} has a run in flight", id)),
            Ok(false) => AppError::NotFound(format!("Job {}", id)),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl JobRegistry for SqliteJobRegistry {
    async fn insert(&self, job: &Job) -> Result<()> {
        let options = serde_json::to_string(&job.options)?;

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, name, source_host_ref, intermediary_host_ref, destination_host_ref,
                workload_id, workload_kind, options,
                is_active, schedule, backup_schedule,
                max_retries, retry_delay_minutes, notify_on_each_run,
                current_status, last_failure, last_error,
                last_run_started_at, last_run_finished_at,
                last_artifact_ref, last_backup_at, last_restore_at, last_duration_ms,
                consecutive_failure_count, run_count, error_count,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.name)
        .bind(&job.source_host_ref)
        .bind(&job.intermediary_host_ref)
        .bind(&job.destination_host_ref)
        .bind(i64::from(job.workload_id))
        .bind(job.workload_kind.to_string())
        .bind(options)
        // Policy
        .bind(job.is_active)
        .bind(&job.schedule)
        .bind(&job.backup_schedule)
        .bind(i64::from(job.max_retries))
        .bind(i64::from(job.retry_delay_minutes))
        .bind(job.notify_on_each_run)
        // State
        .bind(job.current_status.as_str())
        .bind(job.last_failure.map(|f| f.as_str()))
        .bind(&job.last_error)
        .bind(job.last_run_started_at)
        .bind(job.last_run_finished_at)
        .bind(job.last_artifact_ref.as_ref().map(|a| a.as_str()))
        .bind(job.last_backup_at)
        .bind(job.last_restore_at)
        .bind(job.last_duration_ms)
        .bind(i64::from(job.consecutive_failure_count))
        .bind(i64::from(job.run_count))
        .bind(i64::from(job.error_count))
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn list(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs ORDER BY created_at ASC, id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn list_scheduled(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM jobs
            WHERE is_active = 1
              AND (schedule IS NOT NULL OR backup_schedule IS NOT NULL)
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn update_config(&self, job: &Job) -> Result<()> {
        let options = serde_json::to_string(&job.options)?;

        let result = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET name = ?, source_host_ref = ?, intermediary_host_ref = ?, destination_host_ref = ?,
                workload_id = ?, workload_kind = ?, options = ?,
                is_active = ?, schedule = ?, backup_schedule = ?,
                max_retries = ?, retry_delay_minutes = ?, notify_on_each_run = ?,
                last_artifact_ref = ?, updated_at = ?
            WHERE id = ? AND current_status NOT IN {}
            "#,
            IN_FLIGHT_SQL
        ))
        .bind(&job.name)
        .bind(&job.source_host_ref)
        .bind(&job.intermediary_host_ref)
        .bind(&job.destination_host_ref)
        .bind(i64::from(job.workload_id))
        .bind(job.workload_kind.to_string())
        .bind(options)
        .bind(job.is_active)
        .bind(&job.schedule)
        .bind(&job.backup_schedule)
        .bind(i64::from(job.max_retries))
        .bind(i64::from(job.retry_delay_minutes))
        .bind(job.notify_on_each_run)
        .bind(job.last_artifact_ref.as_ref().map(|a| a.as_str()))
        .bind(job.updated_at)
        .bind(&job.id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(self.guard_failure(&job.id).await);
        }
        Ok(())
    }

    async fn save_state(&self, job: &Job) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET current_status = ?, last_failure = ?, last_error = ?,
                last_run_started_at = ?, last_run_finished_at = ?,
                last_artifact_ref = ?, last_backup_at = ?, last_restore_at = ?,
                last_duration_ms = ?,
                consecutive_failure_count = ?, run_count = ?, error_count = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(job.current_status.as_str())
        .bind(job.last_failure.map(|f| f.as_str()))
        .bind(&job.last_error)
        .bind(job.last_run_started_at)
        .bind(job.last_run_finished_at)
        .bind(job.last_artifact_ref.as_ref().map(|a| a.as_str()))
        .bind(job.last_backup_at)
        .bind(job.last_restore_at)
        .bind(job.last_duration_ms)
        .bind(i64::from(job.consecutive_failure_count))
        .bind(i64::from(job.run_count))
        .bind(i64::from(job.error_count))
        .bind(job.updated_at)
        .bind(&job.id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Job {}", job.id)));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        // Runs, phase logs and the lease cascade
        let result = sqlx::query(&format!(
            "DELETE FROM jobs WHERE id = ? AND current_status NOT IN {}",
            IN_FLIGHT_SQL
        ))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(self.guard_failure(id).await);
        }
        Ok(())
    }
}

// Internal row type for sqlx
#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    name: String,
    source_host_ref: String,
    intermediary_host_ref: String,
    destination_host_ref: String,
    workload_id: i64,
    workload_kind: String,
    options: String, // JSON

    is_active: bool,
    schedule: Option<String>,
    backup_schedule: Option<String>,
    max_retries: i64,
    retry_delay_minutes: i64,
    notify_on_each_run: bool,

    current_status: String,
    last_failure: Option<String>,
    last_error: Option<String>,
    last_run_started_at: Option<i64>,
    last_run_finished_at: Option<i64>,
    last_artifact_ref: Option<String>,
    last_backup_at: Option<i64>,
    last_restore_at: Option<i64>,
    last_duration_ms: Option<i64>,
    consecutive_failure_count: i64,
    run_count: i64,
    error_count: i64,

    created_at: i64,
    updated_at: i64,
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        let options: TransferOptions = serde_json::from_str(&self.options)?;
        let last_failure = self
            .last_failure
            .as_deref()
            .map(str::parse::<FailureReason>)
            .transpose()?;

        Ok(Job {
            id: self.id,
            name: self.name,
            source_host_ref: self.source_host_ref,
            intermediary_host_ref: self.intermediary_host_ref,
            destination_host_ref: self.destination_host_ref,
            workload_id: column_u32("workload_id", self.workload_id)?,
            workload_kind: self.workload_kind.parse::<WorkloadKind>()?,
            options,

            is_active: self.is_active,
            schedule: self.schedule,
            backup_schedule: self.backup_schedule,
            max_retries: column_u32("max_retries", self.max_retries)?,
            retry_delay_minutes: column_u32("retry_delay_minutes", self.retry_delay_minutes)?,
            notify_on_each_run: self.notify_on_each_run,

            current_status: self.current_status.parse::<RunStatus>()?,
            last_failure,
            last_error: self.last_error,
            last_run_started_at: self.last_run_started_at,
            last_run_finished_at: self.last_run_finished_at,
            last_artifact_ref: self.last_artifact_ref.map(ArtifactRef::new),
            last_backup_at: self.last_backup_at,
            last_restore_at: self.last_restore_at,
            last_duration_ms: self.last_duration_ms,
            consecutive_failure_count: column_u32(
                "consecutive_failure_count",
                self.consecutive_failure_count,
            )?,
            run_count: column_u32("run_count", self.run_count)?,
            error_count: column_u32("error_count", self.error_count)?,

            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
