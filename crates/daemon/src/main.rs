//! Ferry daemon - composition root
//!
//! Wires the SQLite stores, the ssh remote client and the notification
//! gateway into the orchestrator, then runs recovery, the schedule loop and
//! the JSON-RPC server until Ctrl+C.

mod config;
mod telemetry;

use anyhow::{Context, Result};
use config::DaemonConfig;
use ferry_api_rpc::{RpcHandler, RpcServer};
use ferry_core::application::{
    cancel_channel, JobConfigService, Orchestrator, OrchestratorDeps, RecoveryService, StatusQuery,
    Trigger,
};
use ferry_core::port::id_provider::UuidProvider;
use ferry_core::port::time_provider::SystemTimeProvider;
use ferry_core::port::NotificationGateway;
use ferry_infra_sqlite::{
    create_pool, run_migrations, SqliteHostDirectory, SqliteJobRegistry, SqliteLeaseStore,
    SqlitePhaseLogStore, SqliteRunStore,
};
use ferry_infra_system::{LogNotifier, SshRemoteClient, WebhookNotifier};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long in-flight runs get to finish after Ctrl+C
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Configuration and logging
    let config = DaemonConfig::from_env().context("Invalid daemon configuration")?;
    let _log_guard = telemetry::init_logging(&config).context("Failed to initialise logging")?;

    info!(version = VERSION, owner_id = %config.owner_id, "Ferry daemon starting");

    // 2. Database
    if let Some(parent) = Path::new(&config.db_path).parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    info!(db_path = %config.db_path, "Initializing database");
    let pool = create_pool(&config.db_path)
        .await
        .context("DB pool creation failed")?;
    run_migrations(&pool).await.context("Migration failed")?;

    // 3. Adapters
    let time_provider = Arc::new(SystemTimeProvider);
    let registry = Arc::new(SqliteJobRegistry::new(pool.clone()));
    let runs = Arc::new(SqliteRunStore::new(pool.clone()));
    let phase_log = Arc::new(SqlitePhaseLogStore::new(pool.clone()));
    let leases = Arc::new(SqliteLeaseStore::new(pool.clone()));
    let topology = Arc::new(SqliteHostDirectory::new(pool.clone()));
    let remote = Arc::new(SshRemoteClient::new(config.ssh()));
    let notifier: Arc<dyn NotificationGateway> = match &config.notify_webhook_url {
        Some(url) => {
            info!(url = %url, "Webhook notifications enabled");
            Arc::new(WebhookNotifier::new(url.clone()).context("Invalid webhook URL")?)
        }
        None => Arc::new(LogNotifier),
    };

    // 4. Interrupted run recovery, before anything can start new runs
    let recovery = Arc::new(RecoveryService::new(
        registry.clone(),
        runs.clone(),
        phase_log.clone(),
        leases.clone(),
        time_provider.clone(),
        config.owner_id.clone(),
    ));
    match recovery.recover_interrupted_runs().await {
        Ok(count) => info!(recovered_runs = count, "Interrupted run recovery completed"),
        Err(e) => error!(error = %e, "Interrupted run recovery failed"),
    }

    // 5. Services
    let orchestrator = Arc::new(Orchestrator::new(
        OrchestratorDeps {
            registry: registry.clone(),
            runs: runs.clone(),
            phase_log: phase_log.clone(),
            leases,
            topology: topology.clone(),
            remote,
            notifier,
            time_provider: time_provider.clone(),
            id_provider: Arc::new(UuidProvider),
        },
        config.orchestrator(),
    ));
    // Each tick also fails runs whose lease lapsed under a dead owner
    let trigger = Arc::new(
        Trigger::new(
            orchestrator.clone(),
            registry.clone(),
            time_provider.clone(),
            config.scheduler_tick,
        )
        .with_recovery(recovery),
    );
    let status = Arc::new(StatusQuery::new(
        registry.clone(),
        runs,
        phase_log.clone(),
        time_provider.clone(),
    ));
    let jobs = Arc::new(JobConfigService::new(
        registry,
        phase_log,
        topology,
        Arc::new(UuidProvider),
        time_provider,
    ));

    // 6. JSON-RPC server
    let server = RpcServer::new(
        config.rpc.clone(),
        RpcHandler::new(trigger.clone(), orchestrator.clone(), status, jobs),
    )
    .start()
    .await
    .context("RPC server start failed")?;
    info!(addr = %server.addr, "JSON-RPC server listening");

    // 7. Schedule loop
    let (shutdown_handle, shutdown_token) = cancel_channel();
    let scheduler = tokio::spawn({
        let trigger = trigger.clone();
        async move {
            if let Err(e) = trigger.run(shutdown_token).await {
                error!(error = %e, "Trigger loop failed");
            }
        }
    });

    info!("Ferry ready. Press Ctrl+C to shut down");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // 8. Graceful shutdown
    shutdown_handle.cancel();
    server
        .handle
        .stop()
        .map_err(|e| anyhow::anyhow!("RPC server stop failed: {}", e))?;
    let _ = tokio::time::timeout(Duration::from_secs(5), scheduler).await;

    let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
    while orchestrator.active_run_count() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    let unfinished = orchestrator.active_run_count();
    if unfinished > 0 {
        warn!(
            active_runs = unfinished,
            "Exiting with runs in flight; they will be marked interrupted on next start"
        );
    }

    pool.close().await;
    info!("Shutdown complete");
    Ok(())
}
