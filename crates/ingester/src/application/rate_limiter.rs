//! Connect Rate Limiter
//!
//! Enforces a minimum spacing between connect attempts. The spacing is a
//! hard guarantee: `acquire` does not return until the interval since the
//! previous attempt has fully elapsed.

use std::time::Duration;
use tokio::time::{Instant, sleep};

use super::config::MIN_CONNECT_INTERVAL;

pub struct ConnectRateLimiter {
    /// Minimum interval between attempts
    min_interval: Duration,
    /// Last attempt time
    last_attempt: Option<Instant>,
}

impl ConnectRateLimiter {
    /// Intervals below `MIN_CONNECT_INTERVAL` are raised to it
    pub fn new(min_interval: Duration) -> Self {
        ConnectRateLimiter {
            min_interval: min_interval.max(MIN_CONNECT_INTERVAL),
            last_attempt: None,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn can_proceed(&self) -> bool {
        self.time_until_next().is_zero()
    }

    pub fn time_until_next(&self) -> Duration {
        match self.last_attempt {
            Some(last) => self.min_interval.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// Record an attempt if the interval has elapsed
    pub fn try_acquire(&mut self) -> bool {
        if !self.can_proceed() {
            return false;
        }
        self.last_attempt = Some(Instant::now());
        true
    }

    /// Wait until an attempt is allowed, then record it
    pub async fn acquire(&mut self) {
        loop {
            let wait = self.time_until_next();
            if wait.is_zero() && self.try_acquire() {
                return;
            }
            tracing::debug!(wait_ms = wait.as_millis() as u64, "Throttling connect attempt");
            sleep(wait).await;
        }
    }
}

impl Default for ConnectRateLimiter {
    fn default() -> Self {
        Self::new(MIN_CONNECT_INTERVAL)
    }
}
