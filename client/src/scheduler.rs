//! Time source for the sync engine.
//!
//! Every timestamp and every wait goes through a [`Scheduler`], so backoff
//! and periodic ticks can be driven by hand in tests.

use async_trait::async_trait;
use ferry_engine::Timestamp;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now(&self) -> Timestamp;

    /// Resolve once `duration` has passed on this scheduler's clock.
    /// Dropping the future cancels the wait.
    async fn sleep(&self, duration: Duration);
}

/// Wall clock and tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemScheduler;

#[async_trait]
impl Scheduler for SystemScheduler {
    fn now(&self) -> Timestamp {
        u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    now: AtomicU64,
    advanced: Notify,
}

impl ManualScheduler {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start),
            advanced: Notify::new(),
        }
    }

    /// Move the clock forward and wake every sleeper whose deadline passed.
    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(millis(by), Ordering::SeqCst);
        self.advanced.notify_waiters();
    }

    pub fn set(&self, to: Timestamp) {
        self.now.store(to, Ordering::SeqCst);
        self.advanced.notify_waiters();
    }
}

#[async_trait]
impl Scheduler for ManualScheduler {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }

    async fn sleep(&self, duration: Duration) {
        let deadline = self.now().saturating_add(millis(duration));
        loop {
            // Register before checking so an advance in between is not missed.
            let notified = self.advanced.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.now() >= deadline {
                return;
            }
            notified.await;
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
