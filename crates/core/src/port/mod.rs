// Port Layer - Interfaces for external dependencies

pub mod id_provider; // For deterministic testing
pub mod job_registry;
pub mod lease;
pub mod notification;
pub mod phase_log_store;
pub mod remote_operation;
pub mod run_store;
pub mod time_provider;
pub mod topology;

// Re-exports
pub use id_provider::IdProvider;
pub use job_registry::JobRegistry;
pub use lease::{LeaseConfig, LeaseRecord, LeaseStore};
pub use notification::{NotificationGateway, RunNotification};
pub use phase_log_store::PhaseLogStore;
pub use remote_operation::{
    BackupOutcome, BackupRequest, OpError, OpErrorKind, RemoteOperationClient, RestoreOutcome,
    RestoreRequest,
};
pub use run_store::RunStore;
pub use time_provider::TimeProvider;
pub use topology::TopologyProvider;
