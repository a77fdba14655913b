//! Exponential backoff between retries of the same operation.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay doubles per retry, starting at `base`, never above `cap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
}

impl Backoff {
    /// Create a policy. A zero base is raised to one millisecond so a failed
    /// operation is never immediately due again.
    pub fn new(base: Duration, cap: Duration) -> Self {
        let base = base.max(Duration::from_millis(1));
        Self {
            base,
            cap: cap.max(base),
        }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }

    /// Delay before the attempt following failure number `retries`.
    pub fn delay_for(&self, retries: u32) -> Duration {
        if retries == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(retries - 1).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Delay in whole milliseconds, for adding to a [`crate::Timestamp`].
    pub fn delay_millis(&self, retries: u32) -> u64 {
        u64::try_from(self.delay_for(retries).as_millis()).unwrap_or(u64::MAX)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}
