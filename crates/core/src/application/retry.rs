// Retry policy - whole-run retries bounded by the job's max_retries
use crate::domain::{FailureReason, Job, Run};
use crate::port::TimeProvider;
use std::sync::Arc;
use tracing::{info, warn};

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Start a new attempt of the same run after `delay_ms`
    Retry { delay_ms: i64, next_attempt_at: i64 },
    /// The failure is final for this run
    GiveUp,
}

/// Decides whether a failed attempt is retried.
///
/// Retries are counted per run: attempt `n` failing is retried while
/// `n <= max_retries`, so `max_retries = 2` yields at most 3 attempts.
pub struct RetryPolicy {
    time_provider: Arc<dyn TimeProvider>,
}

impl RetryPolicy {
    pub fn new(time_provider: Arc<dyn TimeProvider>) -> Self {
        Self { time_provider }
    }

    pub fn decide(&self, job: &Job, run: &Run, reason: FailureReason) -> RetryDecision {
        if !reason.is_retryable() {
            info!(
                job_id = %job.id,
                run_id = %run.id,
                reason = %reason,
                "Failure is not retryable"
            );
            return RetryDecision::GiveUp;
        }

        if run.attempt > job.max_retries {
            warn!(
                job_id = %job.id,
                run_id = %run.id,
                attempts = %run.attempt,
                max_retries = %job.max_retries,
                "Max retries reached"
            );
            return RetryDecision::GiveUp;
        }

        let delay_ms = job.retry_delay_ms();
        let next_attempt_at = self.time_provider.now_millis() + delay_ms;

        info!(
            job_id = %job.id,
            run_id = %run.id,
            attempt = %run.attempt,
            max_retries = %job.max_retries,
            delay_ms = %delay_ms,
            "Scheduling retry"
        );

        RetryDecision::Retry {
            delay_ms,
            next_attempt_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RunMode, TriggerSource, WorkloadKind};
    use crate::port::time_provider::mocks::ManualClock;

    fn job(max_retries: u32) -> Job {
        let mut job = Job::new(
            "job-1",
            0,
            "retry test",
            "a",
            "pbs",
            "b",
            100,
            WorkloadKind::Container,
        );
        job.max_retries = max_retries;
        job.retry_delay_minutes = 2;
        job
    }

    fn run_at_attempt(attempt: u32) -> Run {
        let mut run = Run::new("run-1", "job-1", RunMode::Full, TriggerSource::Manual, 0);
        run.attempt = attempt;
        run
    }

    #[test]
    fn test_retries_until_bound() {
        let policy = RetryPolicy::new(Arc::new(ManualClock::new(10_000)));
        let job = job(2);

        assert_eq!(
            policy.decide(&job, &run_at_attempt(1), FailureReason::BackupFailed),
            RetryDecision::Retry {
                delay_ms: 120_000,
                next_attempt_at: 130_000
            }
        );
        assert!(matches!(
            policy.decide(&job, &run_at_attempt(2), FailureReason::RestoreFailed),
            RetryDecision::Retry { .. }
        ));
        assert_eq!(
            policy.decide(&job, &run_at_attempt(3), FailureReason::BackupFailed),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_zero_retries_gives_up_immediately() {
        let policy = RetryPolicy::new(Arc::new(ManualClock::new(0)));
        assert_eq!(
            policy.decide(&job(0), &run_at_attempt(1), FailureReason::BackupFailed),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_non_retryable_reasons() {
        let policy = RetryPolicy::new(Arc::new(ManualClock::new(0)));
        let job = job(10);
        for reason in [
            FailureReason::PreparationFailed,
            FailureReason::NoArtifactAvailable,
            FailureReason::Cancelled,
            FailureReason::Interrupted,
        ] {
            assert_eq!(
                policy.decide(&job, &run_at_attempt(1), reason),
                RetryDecision::GiveUp
            );
        }
    }
}
