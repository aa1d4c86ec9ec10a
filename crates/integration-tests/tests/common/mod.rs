//! Shared SQLite-backed engine for the integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use ferry_core::application::{
    Admission, CreateJobRequest, JobConfigService, Orchestrator, OrchestratorConfig,
    OrchestratorDeps, StatusQuery,
};
use ferry_core::domain::{
    Capabilities, HostEndpoint, Job, Run, RunMode, TriggerSource, WorkloadKind,
};
use ferry_core::port::id_provider::mocks::SequentialIdProvider;
use ferry_core::port::notification::mocks::RecordingNotifier;
use ferry_core::port::remote_operation::mocks::ScriptedRemoteClient;
use ferry_core::port::time_provider::SystemTimeProvider;
use ferry_core::port::{LeaseConfig, RunStore};
use ferry_infra_sqlite::{
    create_memory_pool, run_migrations, SqliteHostDirectory, SqliteJobRegistry, SqliteLeaseStore,
    SqlitePhaseLogStore, SqlitePool, SqliteRunStore,
};

pub struct Engine {
    pub pool: SqlitePool,
    pub orchestrator: Arc<Orchestrator>,
    pub jobs: Arc<JobConfigService>,
    pub status: Arc<StatusQuery>,
    pub registry: Arc<SqliteJobRegistry>,
    pub runs: Arc<SqliteRunStore>,
    pub phase_log: Arc<SqlitePhaseLogStore>,
    pub leases: Arc<SqliteLeaseStore>,
    pub remote: Arc<ScriptedRemoteClient>,
    pub notifier: Arc<RecordingNotifier>,
}

pub async fn memory_pool() -> SqlitePool {
    let pool = create_memory_pool().await.unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

/// Engine over `pool`; `owner` is both the lease owner and the run id prefix
pub fn engine(pool: SqlitePool, remote: ScriptedRemoteClient, owner: &str) -> Engine {
    let time_provider = Arc::new(SystemTimeProvider);
    let registry = Arc::new(SqliteJobRegistry::new(pool.clone()));
    let runs = Arc::new(SqliteRunStore::new(pool.clone()));
    let phase_log = Arc::new(SqlitePhaseLogStore::new(pool.clone()));
    let leases = Arc::new(SqliteLeaseStore::new(pool.clone()));
    let topology = Arc::new(SqliteHostDirectory::new(pool.clone()));
    let remote = Arc::new(remote);
    let notifier = Arc::new(RecordingNotifier::new());

    let orchestrator = Arc::new(Orchestrator::new(
        OrchestratorDeps {
            registry: registry.clone(),
            runs: runs.clone(),
            phase_log: phase_log.clone(),
            leases: leases.clone(),
            topology: topology.clone(),
            remote: remote.clone(),
            notifier: notifier.clone(),
            time_provider: time_provider.clone(),
            id_provider: Arc::new(SequentialIdProvider::new(owner)),
        },
        OrchestratorConfig {
            owner_id: owner.to_string(),
            lease: LeaseConfig::with_ttl(Duration::from_secs(30)),
            backup_timeout: Duration::from_secs(5),
            restore_timeout: Duration::from_secs(5),
        },
    ));
    let status = Arc::new(StatusQuery::new(
        registry.clone(),
        runs.clone(),
        phase_log.clone(),
        time_provider.clone(),
    ));
    let jobs = Arc::new(JobConfigService::new(
        registry.clone(),
        phase_log.clone(),
        topology,
        Arc::new(SequentialIdProvider::new(format!("{}-job", owner))),
        time_provider,
    ));

    Engine {
        pool,
        orchestrator,
        jobs,
        status,
        registry,
        runs,
        phase_log,
        leases,
        remote,
        notifier,
    }
}

impl Engine {
    /// pve-a (source), pbs (intermediary), pve-b (destination)
    pub async fn register_hosts(&self) {
        let mut store = HostEndpoint::new("pbs", "pbs.lan", 0);
        store.capabilities = Capabilities {
            source: false,
            intermediary: true,
            destination: false,
        };
        store.datastore = Some("backups".to_string());

        for host in [
            HostEndpoint::new("pve-a", "pve-a.lan", 0),
            store,
            HostEndpoint::new("pve-b", "pve-b.lan", 0),
        ] {
            self.jobs.upsert_host(host).await.unwrap();
        }
    }

    pub async fn create_job(&self, name: &str, max_retries: u32, notify: bool) -> Job {
        let req: CreateJobRequest = serde_json::from_value(serde_json::json!({
            "name": name,
            "source_host_ref": "pve-a",
            "intermediary_host_ref": "pbs",
            "destination_host_ref": "pve-b",
            "workload_id": 101,
            "workload_kind": WorkloadKind::Container,
            "max_retries": max_retries,
            "retry_delay_minutes": 1,
            "notify_on_each_run": notify
        }))
        .unwrap();
        self.jobs.create(req).await.unwrap()
    }

    /// Admit and drive a run to its terminal state on the current task
    pub async fn run_to_end(&self, job_id: &str, mode: RunMode) -> Run {
        match self
            .orchestrator
            .admit(job_id, mode, TriggerSource::Manual)
            .await
            .unwrap()
        {
            Admission::Accepted(admitted) => self.orchestrator.execute(admitted).await.unwrap(),
            Admission::Rejected(reason) => panic!("unexpected rejection: {:?}", reason),
        }
    }

    /// Poll the run store until `check` holds (5s budget)
    pub async fn wait_for_run(&self, run_id: &str, check: impl Fn(&Run) -> bool) -> Run {
        for _ in 0..250 {
            if let Some(run) = self.runs.find_by_id(run_id).await.unwrap() {
                if check(&run) {
                    return run;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("run {} never reached the expected state", run_id);
    }

    /// Wait until no run is executing in this engine's orchestrator
    pub async fn wait_idle(&self) {
        for _ in 0..250 {
            if self.orchestrator.active_run_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("runs still active");
    }
}
