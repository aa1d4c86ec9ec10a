// Application Layer - Use Cases and Business Logic

pub mod job_config;
pub mod orchestrator;
pub mod recovery;
pub mod retry;
pub mod status;
pub mod trigger;

// Re-exports
pub use job_config::{CreateJobRequest, JobConfigService, JobListItem, UpdateJobRequest};
pub use orchestrator::{
    cancel_channel, Admission, CancelCause, CancelHandle, CancelToken, Orchestrator, OrchestratorConfig,
    OrchestratorDeps, RejectReason,
};
pub use recovery::RecoveryService;
pub use retry::{RetryDecision, RetryPolicy};
pub use status::{JobStatusView, RunSummary, StatusQuery};
pub use trigger::{due_mode, Trigger, TriggerDecision};
