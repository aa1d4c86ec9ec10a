// SQLite RunStore Implementation

use crate::error::{column_u32, map_sqlx_error};
use async_trait::async_trait;
use ferry_core::domain::{
    ArtifactRef, FailureReason, PhaseOutcome, Run, RunMode, RunStatus, TriggerSource,
};
use ferry_core::error::{AppError, Result};
use ferry_core::port::RunStore;
use sqlx::SqlitePool;

pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunStore for SqliteRunStore {
    async fn create(&self, run: &mut Run) -> Result<()> {
        let phase_results = serde_json::to_string(&run.phase_results)?;

        // Sequence is assigned in the same statement so concurrent creators can't collide
        let sequence: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO runs (
                id, job_id, sequence, requested_mode, trigger_source, status,
                failure, error_message, attempt,
                artifact_ref_produced, artifact_ref_used, phase_results,
                created_at, started_at, finished_at, next_attempt_at
            ) VALUES (
                ?, ?,
                (SELECT COALESCE(MAX(sequence), 0) + 1 FROM runs WHERE job_id = ?),
                ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
            )
            RETURNING sequence
            "#,
        )
        .bind(&run.id)
        .bind(&run.job_id)
        .bind(&run.job_id)
        .bind(run.requested_mode.as_str())
        .bind(run.trigger.to_string())
        .bind(run.status.as_str())
        .bind(run.failure.map(|f| f.as_str()))
        .bind(&run.error_message)
        .bind(i64::from(run.attempt))
        .bind(run.artifact_ref_produced.as_ref().map(|a| a.as_str()))
        .bind(run.artifact_ref_used.as_ref().map(|a| a.as_str()))
        .bind(phase_results)
        .bind(run.created_at)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.next_attempt_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        run.sequence = sequence;
        Ok(())
    }

    async fn update(&self, run: &Run) -> Result<()> {
        let phase_results = serde_json::to_string(&run.phase_results)?;

        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = ?, failure = ?, error_message = ?, attempt = ?,
                artifact_ref_produced = ?, artifact_ref_used = ?, phase_results = ?,
                started_at = ?, finished_at = ?, next_attempt_at = ?
            WHERE id = ?
            "#,
        )
        .bind(run.status.as_str())
        .bind(run.failure.map(|f| f.as_str()))
        .bind(&run.error_message)
        .bind(i64::from(run.attempt))
        .bind(run.artifact_ref_produced.as_ref().map(|a| a.as_str()))
        .bind(run.artifact_ref_used.as_ref().map(|a| a.as_str()))
        .bind(phase_results)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.next_attempt_at)
        .bind(&run.id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Run {}", run.id)));
        }
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Run>> {
        let row = sqlx::query_as::<_, RunRow>("SELECT * FROM runs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(RunRow::into_run).transpose()
    }

    async fn list_for_job(&self, job_id: &str, limit: u32) -> Result<Vec<Run>> {
        let rows = sqlx::query_as::<_, RunRow>(
            "SELECT * FROM runs WHERE job_id = ? ORDER BY sequence DESC LIMIT ?",
        )
        .bind(job_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(RunRow::into_run).collect()
    }

    async fn find_non_terminal(&self) -> Result<Vec<Run>> {
        let rows = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT * FROM runs
            WHERE status NOT IN ('COMPLETED', 'FAILED')
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(RunRow::into_run).collect()
    }

    async fn list_terminal_since(&self, since_millis: i64) -> Result<Vec<Run>> {
        let rows = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT * FROM runs
            WHERE status IN ('COMPLETED', 'FAILED') AND finished_at >= ?
            ORDER BY finished_at ASC
            "#,
        )
        .bind(since_millis)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(RunRow::into_run).collect()
    }
}

#[derive(sqlx::FromRow)]
struct RunRow {
    id: String,
    job_id: String,
    sequence: i64,
    requested_mode: String,
    trigger_source: String,
    status: String,
    failure: Option<String>,
    error_message: Option<String>,
    attempt: i64,
    artifact_ref_produced: Option<String>,
    artifact_ref_used: Option<String>,
    phase_results: String, // JSON array
    created_at: i64,
    started_at: Option<i64>,
    finished_at: Option<i64>,
    next_attempt_at: Option<i64>,
}

impl RunRow {
    fn into_run(self) -> Result<Run> {
        let phase_results: Vec<PhaseOutcome> = serde_json::from_str(&self.phase_results)?;

        Ok(Run {
            id: self.id,
            job_id: self.job_id,
            sequence: self.sequence,
            requested_mode: self.requested_mode.parse::<RunMode>()?,
            trigger: self.trigger_source.parse::<TriggerSource>()?,
            status: self.status.parse::<RunStatus>()?,
            failure: self
                .failure
                .as_deref()
                .map(str::parse::<FailureReason>)
                .transpose()?,
            error_message: self.error_message,
            attempt: column_u32("attempt", self.attempt)?,
            artifact_ref_produced: self.artifact_ref_produced.map(ArtifactRef::new),
            artifact_ref_used: self.artifact_ref_used.map(ArtifactRef::new),
            phase_results,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            next_attempt_at: self.next_attempt_at,
        })
    }
}
