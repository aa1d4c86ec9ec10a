// Orchestrator constants (no magic values)
use std::time::Duration;

/// Default per-call timeout for remote backup and restore (2 hours)
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(7200);

/// Default scheduler evaluation interval (1 minute)
pub const DEFAULT_SCHEDULER_TICK: Duration = Duration::from_secs(60);

/// Sleep after a failed scheduler tick before the next one
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Default page size for run listings
pub const DEFAULT_RUN_LIST_LIMIT: u32 = 20;

/// Upper bound for run listings
pub const MAX_RUN_LIST_LIMIT: u32 = 500;
