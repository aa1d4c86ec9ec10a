// Job Lease Port - durable single-owner exclusivity per job
//
// A run acquires its job's lease before Preparing and holds it across every
// attempt and retry delay. The holder extends `expires_at` by heartbeat; an
// expired lease may be taken over by the next acquirer.

use crate::error::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default lease time-to-live (2 minutes)
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub job_id: String,
    pub run_id: String,
    pub owner: String,
    pub acquired_at: i64, // epoch ms
    pub heartbeat_at: i64,
    pub expires_at: i64,
}

impl LeaseRecord {
    /// Returns true once the lease has passed its expiry time
    pub fn is_expired(&self, now_millis: i64) -> bool {
        now_millis >= self.expires_at
    }

    /// Ok only if `owner` holds this lease
    pub fn verify_owner(&self, owner: &str) -> Result<()> {
        if self.owner != owner {
            return Err(AppError::Conflict(format!(
                "lease on job {} is owned by {}, not {}",
                self.job_id, self.owner, owner
            )));
        }
        Ok(())
    }
}

/// Lease timing
#[derive(Debug, Clone)]
pub struct LeaseConfig {
    pub ttl: Duration,
    pub heartbeat_interval: Duration,
}

impl LeaseConfig {
    /// Heartbeat three times per TTL
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            heartbeat_interval: ttl / 3,
        }
    }

    pub fn ttl_ms(&self) -> i64 {
        self.ttl.as_millis() as i64
    }
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_LEASE_TTL)
    }
}

#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Claim the job's lease for `run_id`.
    ///
    /// Returns `None` when another unexpired lease exists. An expired lease
    /// is replaced atomically.
    async fn try_acquire(
        &self,
        job_id: &str,
        run_id: &str,
        owner: &str,
        now_millis: i64,
        ttl_ms: i64,
    ) -> Result<Option<LeaseRecord>>;

    /// Extend a held lease.
    ///
    /// # Errors
    /// - `AppError::Conflict` if the lease is no longer held by this owner/run
    async fn heartbeat(&self, lease: &LeaseRecord, now_millis: i64, ttl_ms: i64) -> Result<()>;

    /// Release a held lease (no-op if already gone or taken over)
    async fn release(&self, lease: &LeaseRecord) -> Result<()>;

    async fn find(&self, job_id: &str) -> Result<Option<LeaseRecord>>;

    /// Drop whatever lease a run holds (startup recovery); returns rows removed
    async fn release_for_run(&self, run_id: &str) -> Result<u64>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryLeaseStore {
        leases: Mutex<HashMap<String, LeaseRecord>>,
        heartbeats: Mutex<usize>,
    }

    impl InMemoryLeaseStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn heartbeat_count(&self) -> usize {
            *self.heartbeats.lock().unwrap()
        }
    }

    #[async_trait]
    impl LeaseStore for InMemoryLeaseStore {
        async fn try_acquire(
            &self,
            job_id: &str,
            run_id: &str,
            owner: &str,
            now_millis: i64,
            ttl_ms: i64,
        ) -> Result<Option<LeaseRecord>> {
            let mut leases = self.leases.lock().unwrap();
            if let Some(existing) = leases.get(job_id) {
                if !existing.is_expired(now_millis) {
                    return Ok(None);
                }
            }
            let record = LeaseRecord {
                job_id: job_id.to_string(),
                run_id: run_id.to_string(),
                owner: owner.to_string(),
                acquired_at: now_millis,
                heartbeat_at: now_millis,
                expires_at: now_millis + ttl_ms,
            };
            leases.insert(job_id.to_string(), record.clone());
            Ok(Some(record))
        }

        async fn heartbeat(
            &self,
            lease: &LeaseRecord,
            now_millis: i64,
            ttl_ms: i64,
        ) -> Result<()> {
            let mut leases = self.leases.lock().unwrap();
            match leases.get_mut(&lease.job_id) {
                Some(held) if held.run_id == lease.run_id && held.owner == lease.owner => {
                    held.heartbeat_at = now_millis;
                    held.expires_at = now_millis + ttl_ms;
                    *self.heartbeats.lock().unwrap() += 1;
                    Ok(())
                }
                _ => Err(AppError::Conflict(format!(
                    "lease on job {} lost by run {}",
                    lease.job_id, lease.run_id
                ))),
            }
        }

        async fn release(&self, lease: &LeaseRecord) -> Result<()> {
            let mut leases = self.leases.lock().unwrap();
            if leases
                .get(&lease.job_id)
                .is_some_and(|held| held.run_id == lease.run_id && held.owner == lease.owner)
            {
                leases.remove(&lease.job_id);
            }
            Ok(())
        }

        async fn find(&self, job_id: &str) -> Result<Option<LeaseRecord>> {
            Ok(self.leases.lock().unwrap().get(job_id).cloned())
        }

        async fn release_for_run(&self, run_id: &str) -> Result<u64> {
            let mut leases = self.leases.lock().unwrap();
            let before = leases.len();
            leases.retain(|_, l| l.run_id != run_id);
            Ok((before - leases.len()) as u64)
        }
    }
}
