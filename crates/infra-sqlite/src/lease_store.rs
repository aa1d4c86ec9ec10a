// SQLite LeaseStore Implementation
//
// One row per job. Acquisition is a single upsert that only replaces an
// existing row once it has expired, so two owners can never both succeed.

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use ferry_core::error::{AppError, Result};
use ferry_core::port::{LeaseRecord, LeaseStore};
use sqlx::SqlitePool;
use tracing::debug;

pub struct SqliteLeaseStore {
    pool: SqlitePool,
}

impl SqliteLeaseStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeaseStore for SqliteLeaseStore {
    async fn try_acquire(
        &self,
        job_id: &str,
        run_id: &str,
        owner: &str,
        now_millis: i64,
        ttl_ms: i64,
    ) -> Result<Option<LeaseRecord>> {
        let record = LeaseRecord {
            job_id: job_id.to_string(),
            run_id: run_id.to_string(),
            owner: owner.to_string(),
            acquired_at: now_millis,
            heartbeat_at: now_millis,
            expires_at: now_millis + ttl_ms,
        };

        let result = sqlx::query(
            r#"
            INSERT INTO job_leases (job_id, run_id, owner, acquired_at, heartbeat_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
                run_id = excluded.run_id,
                owner = excluded.owner,
                acquired_at = excluded.acquired_at,
                heartbeat_at = excluded.heartbeat_at,
                expires_at = excluded.expires_at
            WHERE job_leases.expires_at <= excluded.acquired_at
            "#,
        )
        .bind(&record.job_id)
        .bind(&record.run_id)
        .bind(&record.owner)
        .bind(record.acquired_at)
        .bind(record.heartbeat_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            debug!(job_id = %job_id, run_id = %run_id, "Lease held by another run");
            return Ok(None);
        }
        Ok(Some(record))
    }

    async fn heartbeat(&self, lease: &LeaseRecord, now_millis: i64, ttl_ms: i64) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE job_leases
            SET heartbeat_at = ?, expires_at = ?
            WHERE job_id = ? AND run_id = ? AND owner = ?
            "#,
        )
        .bind(now_millis)
        .bind(now_millis + ttl_ms)
        .bind(&lease.job_id)
        .bind(&lease.run_id)
        .bind(&lease.owner)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "lease on job {} lost by run {}",
                lease.job_id, lease.run_id
            )));
        }
        Ok(())
    }

    async fn release(&self, lease: &LeaseRecord) -> Result<()> {
        sqlx::query("DELETE FROM job_leases WHERE job_id = ? AND run_id = ? AND owner = ?")
            .bind(&lease.job_id)
            .bind(&lease.run_id)
            .bind(&lease.owner)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn find(&self, job_id: &str) -> Result<Option<LeaseRecord>> {
        let row = sqlx::query_as::<_, LeaseRow>("SELECT * FROM job_leases WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(LeaseRow::into_record))
    }

    async fn release_for_run(&self, run_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM job_leases WHERE run_id = ?")
            .bind(run_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct LeaseRow {
    job_id: String,
    run_id: String,
    owner: String,
    acquired_at: i64,
    heartbeat_at: i64,
    expires_at: i64,
}

impl LeaseRow {
    fn into_record(self) -> LeaseRecord {
        LeaseRecord {
            job_id: self.job_id,
            run_id: self.run_id,
            owner: self.owner,
            acquired_at: self.acquired_at,
            heartbeat_at: self.heartbeat_at,
            expires_at: self.expires_at,
        }
    }
}
