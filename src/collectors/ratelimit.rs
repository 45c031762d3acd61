//! A minimal fixed-interval limiter for upstreams with a flat per-request
//! quota (~1 req/6s unauthenticated, ~1 req/0.6s authenticated).
//!
//! This is deliberately smaller than a general token-bucket: there is
//! exactly one process and exactly one caller of each instance (the NVD
//! collector's own page loop), so burst accounting and distributed
//! coordination have no counterpart here: no in-memory state is shared
//! across collectors.

use std::time::Duration;

use tokio::time::{sleep_until, Instant};

/// Sleeps just long enough between calls to keep requests spaced at least
/// `interval` apart.
pub struct IntervalLimiter {
    interval: Duration,
    next_allowed: Instant,
}

impl IntervalLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_allowed: Instant::now(),
        }
    }

    /// The interval regime chosen from whether an API credential is
    /// configured.
    pub fn for_credential(api_key: Option<&str>) -> Self {
        let interval = if api_key.is_some() {
            Duration::from_millis(600)
        } else {
            Duration::from_secs(6)
        };
        Self::new(interval)
    }

    /// Wait until the next request is allowed, then reserve the next
    /// slot.
    pub async fn acquire(&mut self) {
        sleep_until(self.next_allowed).await;
        self.next_allowed = Instant::now() + self.interval;
    }
}

/// Exponential backoff starting at `start` and capped at `max`, used for
/// 429/503 and network-error retries.
pub struct Backoff {
    current: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(start: Duration, max: Duration) -> Self {
        Self {
            current: start,
            max,
        }
    }

    /// The delay to use for this attempt; doubles (capped at `max`) for
    /// the next call.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_secs(6), Duration::from_secs(60));
        assert_eq!(backoff.next_delay(), Duration::from_secs(6));
        assert_eq!(backoff.next_delay(), Duration::from_secs(12));
        assert_eq!(backoff.next_delay(), Duration::from_secs(24));
        assert_eq!(backoff.next_delay(), Duration::from_secs(48));
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));
    }

    #[test]
    fn interval_limiter_selects_regime_by_credential() {
        let unauth = IntervalLimiter::for_credential(None);
        assert_eq!(unauth.interval, Duration::from_secs(6));
        let auth = IntervalLimiter::for_credential(Some("key"));
        assert_eq!(auth.interval, Duration::from_millis(600));
    }
}
