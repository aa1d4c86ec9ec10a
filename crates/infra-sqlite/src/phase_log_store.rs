// SQLite PhaseLogStore Implementation (append-only)

use crate::error::{column_u32, map_sqlx_error};
use async_trait::async_trait;
use ferry_core::domain::{ArtifactRef, FailureReason, Phase, PhaseLogEntry, PhaseStatus};
use ferry_core::error::Result;
use ferry_core::port::PhaseLogStore;
use sqlx::SqlitePool;

pub struct SqlitePhaseLogStore {
    pool: SqlitePool,
}

impl SqlitePhaseLogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PhaseLogStore for SqlitePhaseLogStore {
    async fn append(&self, entry: &PhaseLogEntry) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO phase_logs (
                run_id, job_id, attempt, phase, status,
                started_at, ended_at, duration_ms,
                message, captured_output, error, artifact_ref, failure
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.run_id)
        .bind(&entry.job_id)
        .bind(i64::from(entry.attempt))
        .bind(entry.phase.as_str())
        .bind(entry.status.as_str())
        .bind(entry.started_at)
        .bind(entry.ended_at)
        .bind(entry.duration_ms)
        .bind(&entry.message)
        .bind(&entry.captured_output)
        .bind(&entry.error)
        .bind(entry.artifact_ref.as_ref().map(|a| a.as_str()))
        .bind(entry.failure.map(|f| f.as_str()))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.last_insert_rowid())
    }

    async fn list_for_run(&self, run_id: &str) -> Result<Vec<PhaseLogEntry>> {
        let rows = sqlx::query_as::<_, PhaseLogRow>(
            "SELECT * FROM phase_logs WHERE run_id = ? ORDER BY seq ASC",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(PhaseLogRow::into_entry).collect()
    }

    async fn latest_for_job(&self, job_id: &str, phase: Phase) -> Result<Option<PhaseLogEntry>> {
        let row = sqlx::query_as::<_, PhaseLogRow>(
            "SELECT * FROM phase_logs WHERE job_id = ? AND phase = ? ORDER BY seq DESC LIMIT 1",
        )
        .bind(job_id)
        .bind(phase.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(PhaseLogRow::into_entry).transpose()
    }
}

#[derive(sqlx::FromRow)]
struct PhaseLogRow {
    seq: i64,
    run_id: String,
    job_id: String,
    attempt: i64,
    phase: String,
    status: String,
    started_at: i64,
    ended_at: i64,
    duration_ms: i64,
    message: String,
    captured_output: Option<String>,
    error: Option<String>,
    artifact_ref: Option<String>,
    failure: Option<String>,
}

impl PhaseLogRow {
    fn into_entry(self) -> Result<PhaseLogEntry> {
        Ok(PhaseLogEntry {
            seq: self.seq,
            run_id: self.run_id,
            job_id: self.job_id,
            attempt: column_u32("attempt", self.attempt)?,
            phase: self.phase.parse::<Phase>()?,
            status: self.status.parse::<PhaseStatus>()?,
            started_at: self.started_at,
            ended_at: self.ended_at,
            duration_ms: self.duration_ms,
            message: self.message,
            captured_output: self.captured_output,
            error: self.error,
            artifact_ref: self.artifact_ref.map(ArtifactRef::new),
            failure: self
                .failure
                .as_deref()
                .map(str::parse::<FailureReason>)
                .transpose()?,
        })
    }
}
