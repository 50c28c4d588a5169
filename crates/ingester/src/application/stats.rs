use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the pipeline and gap recovery
#[derive(Debug, Default)]
pub struct PipelineStats {
    frames: AtomicU64,
    delivered: AtomicU64,
    duplicates: AtomicU64,
    parse_errors: AtomicU64,
    exchange_errors: AtomicU64,
    ignored: AtomicU64,
    gaps_detected: AtomicU64,
    gaps_recovered: AtomicU64,
    unrecoverable_gaps: AtomicU64,
    backfilled: AtomicU64,
    held_overflow: AtomicU64,
    visitor_errors: AtomicU64,
}

macro_rules! counter {
    ($incr:ident, $field:ident) => {
        pub fn $incr(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(record_frame, frames);
    counter!(record_delivered, delivered);
    counter!(record_duplicate, duplicates);
    counter!(record_parse_error, parse_errors);
    counter!(record_exchange_error, exchange_errors);
    counter!(record_ignored, ignored);
    counter!(record_gap_detected, gaps_detected);
    counter!(record_gap_recovered, gaps_recovered);
    counter!(record_unrecoverable_gap, unrecoverable_gaps);
    counter!(record_held_overflow, held_overflow);
    counter!(record_visitor_error, visitor_errors);

    pub fn record_backfilled(&self, count: u64) {
        self.backfilled.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            exchange_errors: self.exchange_errors.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            gaps_detected: self.gaps_detected.load(Ordering::Relaxed),
            gaps_recovered: self.gaps_recovered.load(Ordering::Relaxed),
            unrecoverable_gaps: self.unrecoverable_gaps.load(Ordering::Relaxed),
            backfilled: self.backfilled.load(Ordering::Relaxed),
            held_overflow: self.held_overflow.load(Ordering::Relaxed),
            visitor_errors: self.visitor_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of `PipelineStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStatsSnapshot {
    pub frames: u64,
    pub delivered: u64,
    pub duplicates: u64,
    pub parse_errors: u64,
    pub exchange_errors: u64,
    pub ignored: u64,
    pub gaps_detected: u64,
    pub gaps_recovered: u64,
    pub unrecoverable_gaps: u64,
    pub backfilled: u64,
    pub held_overflow: u64,
    pub visitor_errors: u64,
}

/// Counters updated by the connection state machine
#[derive(Debug, Default)]
pub struct ConnectionStats {
    connect_attempts: AtomicU64,
    sessions: AtomicU64,
    reconnects: AtomicU64,
    subscribe_timeouts: AtomicU64,
    slow_initial_connect_warnings: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(record_connect_attempt, connect_attempts);
    counter!(record_session, sessions);
    counter!(record_reconnect, reconnects);
    counter!(record_subscribe_timeout, subscribe_timeouts);
    counter!(record_slow_initial_connect, slow_initial_connect_warnings);

    pub fn snapshot(&self) -> ConnectionStatsSnapshot {
        ConnectionStatsSnapshot {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            sessions: self.sessions.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            subscribe_timeouts: self.subscribe_timeouts.load(Ordering::Relaxed),
            slow_initial_connect_warnings: self
                .slow_initial_connect_warnings
                .load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStatsSnapshot {
    pub connect_attempts: u64,
    pub sessions: u64,
    pub reconnects: u64,
    pub subscribe_timeouts: u64,
    pub slow_initial_connect_warnings: u64,
}
