// SQLite host directory (TopologyProvider)

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use ferry_core::domain::{Capabilities, HostEndpoint};
use ferry_core::error::{AppError, Result};
use ferry_core::port::TopologyProvider;
use sqlx::SqlitePool;

pub struct SqliteHostDirectory {
    pool: SqlitePool,
}

impl SqliteHostDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TopologyProvider for SqliteHostDirectory {
    async fn resolve(&self, host_ref: &str) -> Result<Option<HostEndpoint>> {
        let row = sqlx::query_as::<_, HostRow>("SELECT * FROM hosts WHERE host_ref = ?")
            .bind(host_ref)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(HostRow::into_endpoint).transpose()
    }

    async fn upsert(&self, host: &HostEndpoint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO hosts (
                host_ref, hostname, ssh_port, ssh_user, ssh_key_path, datastore,
                source_capable, intermediary_capable, destination_capable,
                is_online, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(host_ref) DO UPDATE SET
                hostname = excluded.hostname,
                ssh_port = excluded.ssh_port,
                ssh_user = excluded.ssh_user,
                ssh_key_path = excluded.ssh_key_path,
                datastore = excluded.datastore,
                source_capable = excluded.source_capable,
                intermediary_capable = excluded.intermediary_capable,
                destination_capable = excluded.destination_capable,
                is_online = excluded.is_online,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&host.host_ref)
        .bind(&host.hostname)
        .bind(i64::from(host.ssh_port))
        .bind(&host.ssh_user)
        .bind(&host.ssh_key_path)
        .bind(&host.datastore)
        .bind(host.capabilities.source)
        .bind(host.capabilities.intermediary)
        .bind(host.capabilities.destination)
        .bind(host.is_online)
        .bind(host.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn list(&self) -> Result<Vec<HostEndpoint>> {
        let rows = sqlx::query_as::<_, HostRow>("SELECT * FROM hosts ORDER BY host_ref ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(HostRow::into_endpoint).collect()
    }
}

#[derive(sqlx::FromRow)]
struct HostRow {
    host_ref: String,
    hostname: String,
    ssh_port: i64,
    ssh_user: String,
    ssh_key_path: Option<String>,
    datastore: Option<String>,
    source_capable: bool,
    intermediary_capable: bool,
    destination_capable: bool,
    is_online: bool,
    updated_at: i64,
}

impl HostRow {
    fn into_endpoint(self) -> Result<HostEndpoint> {
        let ssh_port = u16::try_from(self.ssh_port).map_err(|_| {
            AppError::Database(format!(
                "Column ssh_port out of range for host {}: {}",
                self.host_ref, self.ssh_port
            ))
        })?;

        Ok(HostEndpoint {
            host_ref: self.host_ref,
            hostname: self.hostname,
            ssh_port,
            ssh_user: self.ssh_user,
            ssh_key_path: self.ssh_key_path,
            datastore: self.datastore,
            capabilities: Capabilities {
                source: self.source_capable,
                intermediary: self.intermediary_capable,
                destination: self.destination_capable,
            },
            is_online: self.is_online,
            updated_at: self.updated_at,
        })
    }
}
