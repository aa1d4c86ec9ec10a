//! Daemon configuration from `FERRY_*` environment variables

use ferry_api_rpc::RpcServerConfig;
use ferry_core::application::orchestrator::constants::{
    DEFAULT_REMOTE_TIMEOUT, DEFAULT_SCHEDULER_TICK,
};
use ferry_core::application::OrchestratorConfig;
use ferry_core::error::{AppError, Result};
use ferry_core::port::lease::{LeaseConfig, DEFAULT_LEASE_TTL};
use ferry_infra_system::SshConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_DB_PATH: &str = "~/.ferry/ferry.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub db_path: String,
    pub rpc: RpcServerConfig,
    pub log_format: LogFormat,
    /// Daily rolling log files are written here when set
    pub log_dir: Option<PathBuf>,
    pub owner_id: String,
    pub lease_ttl: Duration,
    pub backup_timeout: Duration,
    pub restore_timeout: Duration,
    pub scheduler_tick: Duration,
    pub notify_webhook_url: Option<String>,
    pub ssh_key_path: Option<String>,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; blank values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let db_path = get("FERRY_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let db_path = shellexpand::tilde(&db_path).into_owned();

        let mut rpc = RpcServerConfig::default();
        if let Some(host) = get("FERRY_RPC_HOST") {
            rpc.host = host;
        }
        if let Some(port) = parse_var::<u16>("FERRY_RPC_PORT", get("FERRY_RPC_PORT"))? {
            rpc.port = port;
        }

        let log_format = match get("FERRY_LOG_FORMAT").as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(AppError::Config(format!(
                    "FERRY_LOG_FORMAT must be 'pretty' or 'json', got '{}'",
                    other
                )))
            }
        };

        // Stable across restarts so startup recovery reclaims this node's runs
        let owner_id = get("FERRY_OWNER_ID")
            .or_else(|| get("HOSTNAME"))
            .unwrap_or_else(|| "ferry".to_string());

        Ok(Self {
            db_path,
            rpc,
            log_format,
            log_dir: get("FERRY_LOG_DIR").map(|d| PathBuf::from(shellexpand::tilde(&d).into_owned())),
            owner_id,
            lease_ttl: secs_var("FERRY_LEASE_TTL_SECS", get("FERRY_LEASE_TTL_SECS"), DEFAULT_LEASE_TTL)?,
            backup_timeout: secs_var(
                "FERRY_BACKUP_TIMEOUT_SECS",
                get("FERRY_BACKUP_TIMEOUT_SECS"),
                DEFAULT_REMOTE_TIMEOUT,
            )?,
            restore_timeout: secs_var(
                "FERRY_RESTORE_TIMEOUT_SECS",
                get("FERRY_RESTORE_TIMEOUT_SECS"),
                DEFAULT_REMOTE_TIMEOUT,
            )?,
            scheduler_tick: secs_var(
                "FERRY_SCHEDULER_TICK_SECS",
                get("FERRY_SCHEDULER_TICK_SECS"),
                DEFAULT_SCHEDULER_TICK,
            )?,
            notify_webhook_url: get("FERRY_NOTIFY_WEBHOOK_URL"),
            ssh_key_path: get("FERRY_SSH_KEY_PATH").map(|p| shellexpand::tilde(&p).into_owned()),
        })
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            owner_id: self.owner_id.clone(),
            lease: LeaseConfig::with_ttl(self.lease_ttl),
            backup_timeout: self.backup_timeout,
            restore_timeout: self.restore_timeout,
        }
    }

    pub fn ssh(&self) -> SshConfig {
        SshConfig {
            default_key_path: self.ssh_key_path.clone(),
            ..SshConfig::default()
        }
    }
}

fn parse_var<T: FromStr>(key: &str, value: Option<String>) -> Result<Option<T>> {
    value
        .map(|v| {
            v.parse::<T>()
                .map_err(|_| AppError::Config(format!("{} has an invalid value '{}'", key, v)))
        })
        .transpose()
}

/// Whole seconds, at least one
fn secs_var(key: &str, value: Option<String>, default: Duration) -> Result<Duration> {
    match parse_var::<u64>(key, value)? {
        None => Ok(default),
        Some(0) => Err(AppError::Config(format!("{} must be at least 1", key))),
        Some(secs) => Ok(Duration::from_secs(secs)),
    }
}
