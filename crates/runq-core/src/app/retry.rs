//! Retry policy: decides backoff delays.

use std::time::Duration;

/// Exponential backoff with a hard ceiling.
///
/// `delay = min(max_delay, base_delay * 2^(tries - 1))`
///
/// With the defaults (60 s base, one hour ceiling):
/// - try 1: 1 minute
/// - try 2: 2 minutes
/// - try 3: 4 minutes
/// - try 7 and later: 1 hour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const BASE_DELAY: Duration = Duration::from_secs(60);

    pub fn new(max_delay: Duration) -> Self {
        Self {
            base_delay: Self::BASE_DELAY,
            max_delay,
        }
    }

    pub fn with_max_delay_secs(max_delay_secs: u64) -> Self {
        Self::new(Duration::from_secs(max_delay_secs))
    }

    /// Delay before the next attempt, given the try count *after* the
    /// failure was counted. `tries == 0` is treated like 1.
    pub fn next_delay(&self, tries: u32) -> Duration {
        let factor = 2u32.checked_pow(tries.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Epoch millis at which a request that failed `tries` times becomes ready.
    pub fn next_run_at(&self, tries: u32, now_millis: i64) -> i64 {
        let delay = i64::try_from(self.next_delay(tries).as_millis()).unwrap_or(i64::MAX);
        now_millis.saturating_add(delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}
