// Lease heartbeat task

use super::cancel::{CancelCause, CancelHandle};
use crate::error::AppError;
use crate::port::{LeaseConfig, LeaseRecord, LeaseStore, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(10);

/// Aborts the heartbeat task when dropped (including on unwind)
pub(super) struct HeartbeatGuard {
    handle: JoinHandle<()>,
}

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Extend `lease` every `heartbeat_interval` until the guard is dropped.
///
/// Signals `LeaseLost` on `run` and stops once the lease is taken over, or
/// once failed renewals would let it expire before the next tick.
pub(super) fn spawn(
    leases: Arc<dyn LeaseStore>,
    time_provider: Arc<dyn TimeProvider>,
    lease: LeaseRecord,
    config: LeaseConfig,
    run: CancelHandle,
) -> HeartbeatGuard {
    let handle = tokio::spawn(async move {
        let interval = config.heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL);
        let interval_ms = interval.as_millis() as i64;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        let mut expires_at = lease.expires_at;
        loop {
            ticker.tick().await;
            let now = time_provider.now_millis();
            match leases.heartbeat(&lease, now, config.ttl_ms()).await {
                Ok(()) => {
                    expires_at = now + config.ttl_ms();
                    debug!(job_id = %lease.job_id, run_id = %lease.run_id, "Lease extended");
                }
                Err(AppError::Conflict(reason)) => {
                    error!(
                        job_id = %lease.job_id,
                        run_id = %lease.run_id,
                        reason = %reason,
                        "Lease taken over, stopping run"
                    );
                    run.cancel_with(CancelCause::LeaseLost);
                    return;
                }
                Err(e) if now + interval_ms >= expires_at => {
                    error!(
                        job_id = %lease.job_id,
                        run_id = %lease.run_id,
                        error = %e,
                        expires_at = %expires_at,
                        "Lease cannot be renewed before it expires, stopping run"
                    );
                    run.cancel_with(CancelCause::LeaseLost);
                    return;
                }
                Err(e) => warn!(
                    job_id = %lease.job_id,
                    run_id = %lease.run_id,
                    error = %e,
                    "Lease heartbeat failed"
                ),
            }
        }
    });
    HeartbeatGuard { handle }
}
