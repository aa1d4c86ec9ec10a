// Time Provider Port (for testability)

/// Time provider interface (allows mocking in tests)
pub trait TimeProvider: Send + Sync {
    /// Get current time in milliseconds since epoch
    fn now_millis(&self) -> i64;
}

/// System time provider (production)
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

pub mod mocks {
    use super::TimeProvider;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Clock that only moves when told to
    pub struct ManualClock {
        now: AtomicI64,
    }

    impl ManualClock {
        pub fn new(start_millis: i64) -> Self {
            Self {
                now: AtomicI64::new(start_millis),
            }
        }

        pub fn advance(&self, millis: i64) {
            self.now.fetch_add(millis, Ordering::SeqCst);
        }

        pub fn set(&self, millis: i64) {
            self.now.store(millis, Ordering::SeqCst);
        }
    }

    impl TimeProvider for ManualClock {
        fn now_millis(&self) -> i64 {
            self.now.load(Ordering::SeqCst)
        }
    }

    /// Clock driven by tokio's (pausable) timer, offset from a fixed epoch.
    ///
    /// Under `start_paused` tests, `tokio::time::sleep` advances this clock too.
    pub struct TokioClock {
        base_millis: i64,
        origin: tokio::time::Instant,
    }

    impl TokioClock {
        pub fn new(base_millis: i64) -> Self {
            Self {
                base_millis,
                origin: tokio::time::Instant::now(),
            }
        }
    }

    impl TimeProvider for TokioClock {
        fn now_millis(&self) -> i64 {
            self.base_millis + self.origin.elapsed().as_millis() as i64
        }
    }
}
