// Domain Layer - Pure business logic and entities

pub mod error;
pub mod host;
pub mod job;
pub mod phase_log;
pub mod run;
pub mod schedule;

// Re-exports
pub use error::DomainError;
pub use host::{Capabilities, HostEndpoint, HostRef, HostRole};
pub use job::{
    ArtifactRef, BackupMode, Compression, Job, JobId, TransferOptions, WorkloadId, WorkloadKind,
};
pub use phase_log::{Phase, PhaseLogEntry, PhaseStatus};
pub use run::{
    FailureReason, PhaseOutcome, Run, RunId, RunMode, RunStatus, TerminalStatus, TriggerSource,
};
pub use schedule::CronSchedule;
