//! Backoff and deadline timers
//!
//! `ReconnectBackoff` produces a non-decreasing, capped, jittered delay
//! sequence. `DeadlineTimer` tracks time since a lifecycle milestone.

use rand::Rng;
use std::time::Duration;
use tokio::time::{Instant, sleep_until};

use super::config::BackoffConfig;

/// Capped exponential backoff with additive jitter
///
/// delay(n) = min(max, base * multiplier^n) * (1 + jitter * u), u in [0, 1),
/// clamped to `[floor, max]` and never shorter than the previous delay.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    config: BackoffConfig,
    attempt: u32,
    last_delay: Duration,
}

impl ReconnectBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        ReconnectBackoff {
            config,
            attempt: 0,
            last_delay: Duration::ZERO,
        }
    }

    /// Number of delays handed out since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn next_delay(&mut self) -> Duration {
        let max_ms = self.config.max.as_secs_f64() * 1000.0;
        let exponent = self.attempt.min(63) as i32;
        let nominal_ms =
            (self.config.base.as_secs_f64() * 1000.0 * self.config.multiplier.powi(exponent))
                .min(max_ms);

        let jitter = self.config.jitter_factor.clamp(0.0, 1.0);
        let jittered_ms = if jitter > 0.0 {
            nominal_ms * (1.0 + jitter * rand::thread_rng().gen_range(0.0..1.0))
        } else {
            nominal_ms
        };

        let delay = Duration::from_secs_f64(jittered_ms.min(max_ms).max(0.0) / 1000.0)
            .max(self.config.floor)
            .max(self.last_delay);

        self.attempt = self.attempt.saturating_add(1);
        self.last_delay = delay;
        delay
    }

    /// Start the curve over (after a session reaches streaming)
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.last_delay = Duration::ZERO;
    }
}

/// Tracks elapsed time since a milestone against a deadline
#[derive(Debug, Clone)]
pub struct DeadlineTimer {
    deadline: Duration,
    armed_at: Option<Instant>,
}

impl DeadlineTimer {
    pub fn new(deadline: Duration) -> Self {
        DeadlineTimer {
            deadline,
            armed_at: None,
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn arm(&mut self) {
        self.armed_at = Some(Instant::now());
    }

    pub fn is_armed(&self) -> bool {
        self.armed_at.is_some()
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.armed_at.map(|at| at.elapsed())
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.armed_at.map(|at| at + self.deadline)
    }

    pub fn is_expired(&self) -> bool {
        self.elapsed().is_some_and(|elapsed| elapsed >= self.deadline)
    }

    /// Resolves once the deadline passes; never resolves before `arm`
    pub async fn expired(&self) {
        match self.expires_at() {
            Some(at) => sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    }
}
