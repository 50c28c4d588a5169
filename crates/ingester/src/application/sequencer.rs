//! Per-key sequence tracking
//!
//! One `SequenceTracker` exists per (product, channel). It classifies every
//! arriving sequence number, records outstanding gaps and holds messages
//! that cannot be delivered yet because an earlier range is still being
//! repaired.

use std::collections::BTreeMap;
use tickvault_core::{GapRange, Message, SequenceNumber};

/// Classification of an arriving sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    /// Next expected number (or the first one seen for the key)
    InOrder,
    /// At or below the last seen number
    Duplicate { last_seen: SequenceNumber },
    /// Numbers between the last seen and this one are missing
    Gap(GapRange),
}

/// Observable state of one tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerStatus {
    pub last_seen: Option<SequenceNumber>,
    pub last_delivered: Option<SequenceNumber>,
    pub pending: Option<GapRange>,
    pub in_flight: Option<GapRange>,
    pub held: usize,
    pub worker_running: bool,
    /// Unsubscribed; the next subscribe starts a new baseline
    pub retired: bool,
}

impl TrackerStatus {
    pub fn is_recovering(&self) -> bool {
        self.worker_running || self.pending.is_some() || self.in_flight.is_some() || self.held > 0
    }
}

#[derive(Debug, Default)]
pub struct SequenceTracker {
    last_seen: Option<SequenceNumber>,
    last_delivered: Option<SequenceNumber>,
    /// Missing range not yet handed to a fetch
    pending: Option<GapRange>,
    /// Range a fetch is currently working on
    in_flight: Option<GapRange>,
    held: BTreeMap<SequenceNumber, Message>,
    worker_running: bool,
    retired: bool,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify `sequence` and advance the last seen number on `InOrder`
    /// and `Gap`.
    pub fn check(&mut self, sequence: SequenceNumber) -> SequenceCheck {
        let Some(last) = self.last_seen else {
            self.last_seen = Some(sequence);
            return SequenceCheck::InOrder;
        };

        if sequence <= last {
            return SequenceCheck::Duplicate { last_seen: last };
        }

        self.last_seen = Some(sequence);
        match GapRange::new(last + 1, sequence - 1) {
            Some(range) => SequenceCheck::Gap(range),
            None => SequenceCheck::InOrder,
        }
    }

    /// Advance on a channel whose numbers are sampled from another feed.
    ///
    /// Jumps are expected there; returns false only for a number at or
    /// below the last one seen.
    pub fn advance(&mut self, sequence: SequenceNumber) -> bool {
        if self.last_seen.is_some_and(|last| sequence <= last) {
            return false;
        }
        self.last_seen = Some(sequence);
        self.last_delivered = Some(sequence);
        true
    }

    pub fn retire(&mut self) {
        self.retired = true;
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    /// Forget the last seen number so the next message becomes the new
    /// baseline. The delivery watermark survives while a recovery for the
    /// old range still drains.
    pub fn rebase(&mut self) {
        self.retired = false;
        self.last_seen = None;
        if !self.is_recovering() {
            self.last_delivered = None;
        }
    }

    /// True while messages for this key must go through the held buffer
    pub fn is_recovering(&self) -> bool {
        self.worker_running
            || self.pending.is_some()
            || self.in_flight.is_some()
            || !self.held.is_empty()
    }

    /// True if `sequence` is part of a gap that has not been resolved yet
    pub fn is_outstanding(&self, sequence: SequenceNumber) -> bool {
        self.pending.is_some_and(|r| r.contains(sequence))
            || self.in_flight.is_some_and(|r| r.contains(sequence))
    }

    pub fn is_held(&self, sequence: SequenceNumber) -> bool {
        self.held.contains_key(&sequence)
    }

    /// Merge `range` into the pending gap
    pub fn add_gap(&mut self, range: GapRange) {
        self.pending = Some(match self.pending {
            Some(pending) => pending.merge(&range),
            None => range,
        });
    }

    /// Hold a message until everything before it is delivered.
    ///
    /// When the buffer is full the message is dropped and its sequence
    /// number joins the pending gap so it is fetched again later. Returns
    /// false in that case.
    pub fn hold(&mut self, message: Message, max_held: usize) -> bool {
        let sequence = message.sequence();
        if self.held.len() >= max_held && !self.held.contains_key(&sequence) {
            self.add_gap(GapRange::single(sequence));
            return false;
        }
        self.held.entry(sequence).or_insert(message);
        true
    }

    /// Record a message delivered directly, bypassing the held buffer
    pub fn mark_delivered(&mut self, sequence: SequenceNumber) {
        self.last_delivered = Some(sequence);
    }

    /// Claim the recovery worker slot. Returns false if a worker already runs.
    pub fn claim_worker(&mut self) -> bool {
        if self.worker_running {
            return false;
        }
        self.worker_running = true;
        true
    }

    pub fn release_worker(&mut self) {
        self.worker_running = false;
    }

    /// True if there is work for a worker and none is running
    pub fn needs_worker(&self) -> bool {
        !self.worker_running && (self.pending.is_some() || !self.held.is_empty())
    }

    /// Move the pending gap into flight
    pub fn take_pending(&mut self) -> Option<GapRange> {
        let range = self.pending.take()?;
        self.in_flight = Some(range);
        Some(range)
    }

    /// Put an interrupted fetch back so a later worker retries it
    pub fn requeue(&mut self, range: GapRange) {
        if self.in_flight == Some(range) {
            self.in_flight = None;
        }
        self.add_gap(range);
    }

    /// Give up on an in-flight range
    pub fn abandon(&mut self, range: GapRange) {
        if self.in_flight == Some(range) {
            self.in_flight = None;
        }
    }

    /// Merge fetched messages for the in-flight range.
    ///
    /// Returns the sub-ranges that are still missing afterwards.
    pub fn complete(&mut self, range: GapRange, fetched: Vec<Message>) -> Vec<GapRange> {
        if self.in_flight == Some(range) {
            self.in_flight = None;
        }

        for message in fetched {
            let sequence = message.sequence();
            if range.contains(sequence) && !self.already_delivered(sequence) {
                self.held.entry(sequence).or_insert(message);
            }
        }

        let mut missing = Vec::new();
        let mut next = range.low();
        for &sequence in self.held.range(range.low()..=range.high()).map(|(s, _)| s) {
            if sequence > next {
                missing.extend(GapRange::new(next, sequence - 1));
            }
            next = sequence.saturating_add(1);
        }
        missing.extend(GapRange::new(next, range.high()));
        missing
    }

    /// Pop every held message that no outstanding gap precedes
    pub fn drain_ready(&mut self) -> Vec<Message> {
        let limit = match (self.pending, self.in_flight) {
            (Some(p), Some(f)) => Some(p.low().min(f.low())),
            (Some(p), None) => Some(p.low()),
            (None, Some(f)) => Some(f.low()),
            (None, None) => None,
        };

        let mut ready = Vec::new();
        while let Some(entry) = self.held.first_entry() {
            if limit.is_some_and(|low| *entry.key() >= low) {
                break;
            }
            let message = entry.remove();
            if self.already_delivered(message.sequence()) {
                tracing::error!(
                    sequence = message.sequence(),
                    last_delivered = self.last_delivered,
                    "Held message at or below delivery watermark, dropped"
                );
                continue;
            }
            self.last_delivered = Some(message.sequence());
            ready.push(message);
        }
        ready
    }

    pub fn status(&self) -> TrackerStatus {
        TrackerStatus {
            last_seen: self.last_seen,
            last_delivered: self.last_delivered,
            pending: self.pending,
            in_flight: self.in_flight,
            held: self.held.len(),
            worker_running: self.worker_running,
            retired: self.retired,
        }
    }

    fn already_delivered(&self, sequence: SequenceNumber) -> bool {
        self.last_delivered.is_some_and(|d| sequence <= d)
    }
}
