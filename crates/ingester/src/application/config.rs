use std::time::Duration;

use tickvault_core::Channel;

/// Hard floor between two connect attempts
pub const MIN_CONNECT_INTERVAL: Duration = Duration::from_millis(500);

/// Configuration for the connection state machine
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Minimum spacing between connect attempts (never below `MIN_CONNECT_INTERVAL`)
    pub min_connect_interval: Duration,
    /// Warn if the first session since start has not reached streaming by then
    pub initial_connect_deadline: Duration,
    /// Discard the session if the subscribe ack does not arrive in time
    pub subscribe_ack_timeout: Duration,
    /// Reconnect backoff curve
    pub backoff: BackoffConfig,
    /// Window in which subscription changes are coalesced into one delta
    pub reconcile_debounce: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            min_connect_interval: MIN_CONNECT_INTERVAL,
            initial_connect_deadline: Duration::from_secs(15),
            subscribe_ack_timeout: Duration::from_secs(5),
            backoff: BackoffConfig::default(),
            reconcile_debounce: Duration::from_millis(50),
        }
    }
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_connect_interval(mut self, interval: Duration) -> Self {
        self.min_connect_interval = interval;
        self
    }

    pub fn with_initial_connect_deadline(mut self, deadline: Duration) -> Self {
        self.initial_connect_deadline = deadline;
        self
    }

    pub fn with_subscribe_ack_timeout(mut self, timeout: Duration) -> Self {
        self.subscribe_ack_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_reconcile_debounce(mut self, debounce: Duration) -> Self {
        self.reconcile_debounce = debounce;
        self
    }
}

/// Capped exponential backoff with jitter
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub base: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Fraction of the nominal delay added as random jitter, in `[0, 1)`
    pub jitter_factor: f64,
    /// No delay is ever shorter than this
    pub floor: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.2,
            floor: MIN_CONNECT_INTERVAL,
        }
    }
}

impl BackoffConfig {
    /// Backoff without jitter, handy for deterministic tests
    pub fn fixed_curve(base: Duration, max: Duration, floor: Duration) -> Self {
        BackoffConfig {
            base,
            max,
            multiplier: 2.0,
            jitter_factor: 0.0,
            floor,
        }
    }
}

/// Configuration for gap recovery
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Fetch attempts per gap before it is declared unrecoverable
    pub max_attempts: u32,
    /// Delay curve between fetch attempts
    pub retry_backoff: BackoffConfig,
    /// Timeout applied to each individual fetch
    pub fetch_timeout: Duration,
    /// Live messages held per key while a gap is being repaired
    pub max_held_messages: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        RecoveryConfig {
            max_attempts: 5,
            retry_backoff: BackoffConfig {
                base: Duration::from_millis(250),
                max: Duration::from_secs(5),
                multiplier: 2.0,
                jitter_factor: 0.2,
                floor: Duration::ZERO,
            },
            fetch_timeout: Duration::from_secs(10),
            max_held_messages: 10_000,
        }
    }
}

impl RecoveryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_max_held_messages(mut self, max: usize) -> Self {
        self.max_held_messages = max;
        self
    }
}

/// Channels subscribed for every product when none are configured
pub fn default_channels() -> Vec<Channel> {
    vec![Channel::Full]
}
