// Ferry Infrastructure - SQLite Adapter
// Implements: JobRegistry, RunStore, PhaseLogStore, LeaseStore, TopologyProvider

mod connection;
mod error;
mod host_directory;
mod job_registry;
mod lease_store;
mod migration;
mod phase_log_store;
mod run_store;

pub use connection::{create_memory_pool, create_pool};
pub use host_directory::SqliteHostDirectory;
pub use job_registry::SqliteJobRegistry;
pub use lease_store::SqliteLeaseStore;
pub use migration::run_migrations;
pub use phase_log_store::SqlitePhaseLogStore;
pub use run_store::SqliteRunStore;

pub use sqlx::SqlitePool;

// Note: sqlx::Error conversion is handled by `error::map_sqlx_error`
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
