//! Gap recovery
//!
//! Live messages enter through `admit`. While a key has an outstanding gap,
//! its live messages are held; a per-key worker fetches the missing range
//! over the backfill source and replays fetched and held messages through
//! the visitor chain in ascending sequence order. Other keys are unaffected.
//!
//! Only channels with contiguous numbering are gap-checked. Sampled
//! channels (heartbeat, ticker, matches) drop stale numbers and deliver
//! everything else as it arrives.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tickvault_core::{GapRange, Message, SubscriptionKey};
use tickvault_ports::{BackfillSource, FetchError};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use super::backoff::ReconnectBackoff;
use super::config::RecoveryConfig;
use super::pipeline::VisitorChain;
use super::sequencer::{SequenceCheck, SequenceTracker, TrackerStatus};
use super::stats::PipelineStats;

/// What `admit` did with a live message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitOutcome {
    Delivered,
    Held,
    Duplicate,
    GapDetected(GapRange),
}

#[derive(Error, Debug)]
enum RecoveryError {
    #[error("Recovery cancelled")]
    Cancelled,
    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: FetchError },
}

enum WorkerStep {
    Deliver(Vec<Message>),
    Fetch(GapRange),
    Done,
}

type SharedTracker = Arc<Mutex<SequenceTracker>>;

pub struct GapRecoveryCoordinator {
    trackers: DashMap<SubscriptionKey, SharedTracker>,
    chain: Arc<VisitorChain>,
    backfill: Arc<dyn BackfillSource>,
    config: RecoveryConfig,
    stats: Arc<PipelineStats>,
    cancel: Mutex<CancellationToken>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl GapRecoveryCoordinator {
    pub fn new(
        chain: Arc<VisitorChain>,
        backfill: Arc<dyn BackfillSource>,
        config: RecoveryConfig,
        stats: Arc<PipelineStats>,
    ) -> Self {
        GapRecoveryCoordinator {
            trackers: DashMap::new(),
            chain,
            backfill,
            config,
            stats,
            cancel: Mutex::new(CancellationToken::new()),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn chain(&self) -> &Arc<VisitorChain> {
        &self.chain
    }

    /// Sequence-check a live message and deliver, hold or drop it
    pub async fn admit(self: &Arc<Self>, message: Message) -> AdmitOutcome {
        let key = message.key();
        let sequence = message.sequence();
        let tracker = self.tracker(&key);

        if !key.channel.is_gap_checked() {
            return self.admit_sampled(&key, &tracker, message).await;
        }

        let (outcome, deliver, spawn) = {
            let mut t = tracker.lock();
            match t.check(sequence) {
                SequenceCheck::InOrder if !t.is_recovering() => {
                    t.mark_delivered(sequence);
                    (AdmitOutcome::Delivered, Some(message), false)
                }
                SequenceCheck::InOrder => {
                    self.hold(&mut t, &key, message);
                    (AdmitOutcome::Held, None, t.needs_worker() && t.claim_worker())
                }
                SequenceCheck::Duplicate { last_seen } => {
                    if t.is_outstanding(sequence) && !t.is_held(sequence) {
                        // Late live copy of a missing message
                        tracing::debug!(key = %key, sequence, "Late message fills pending gap");
                        self.hold(&mut t, &key, message);
                        (AdmitOutcome::Held, None, false)
                    } else {
                        self.stats.record_duplicate();
                        tracing::debug!(key = %key, sequence, last_seen, "Duplicate dropped");
                        (AdmitOutcome::Duplicate, None, false)
                    }
                }
                SequenceCheck::Gap(range) => {
                    self.stats.record_gap_detected();
                    tracing::warn!(
                        event = "gap_detected",
                        key = %key,
                        low = range.low(),
                        high = range.high(),
                        missing = range.len(),
                        "Sequence gap detected"
                    );
                    t.add_gap(range);
                    self.hold(&mut t, &key, message);
                    (AdmitOutcome::GapDetected(range), None, t.claim_worker())
                }
            }
        };

        if spawn {
            self.spawn_worker(key, tracker);
        }
        if let Some(message) = deliver {
            self.chain.dispatch(&message).await;
            self.stats.record_delivered();
        }
        outcome
    }

    async fn admit_sampled(
        &self,
        key: &SubscriptionKey,
        tracker: &SharedTracker,
        message: Message,
    ) -> AdmitOutcome {
        let sequence = message.sequence();
        if !tracker.lock().advance(sequence) {
            self.stats.record_duplicate();
            tracing::debug!(key = %key, sequence, "Stale sampled message dropped");
            return AdmitOutcome::Duplicate;
        }
        self.chain.dispatch(&message).await;
        self.stats.record_delivered();
        AdmitOutcome::Delivered
    }

    /// Restart workers for gaps left pending by an earlier `shutdown`
    pub fn resume_pending(self: &Arc<Self>) {
        {
            let mut cancel = self.cancel.lock();
            if cancel.is_cancelled() {
                *cancel = CancellationToken::new();
            }
        }

        let resumable: Vec<(SubscriptionKey, SharedTracker)> = self
            .trackers
            .iter()
            .filter(|entry| {
                let mut t = entry.value().lock();
                t.needs_worker() && t.claim_worker()
            })
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        for (key, tracker) in resumable {
            tracing::info!(key = %key, "Resuming pending gap recovery");
            self.spawn_worker(key, tracker);
        }
    }

    /// Cancel in-flight recovery and wait for the workers to stop.
    ///
    /// Interrupted ranges stay pending for `resume_pending`.
    pub async fn shutdown(&self) {
        self.cancel.lock().cancel();
        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Recovery worker panicked");
            }
        }
    }

    /// Mark keys whose unsubscribe went out. Their trackers stay, so late
    /// messages and running recoveries keep working.
    pub fn retire(&self, keys: &[SubscriptionKey]) {
        for key in keys {
            if let Some(tracker) = self.trackers.get(key) {
                tracker.lock().retire();
            }
        }
    }

    /// Start a new baseline for retired keys that are being subscribed
    /// again. The exchange keeps numbering while a key is unsubscribed.
    pub fn rebaseline(&self, keys: &[SubscriptionKey]) {
        for key in keys {
            let Some(tracker) = self.trackers.get(key) else {
                continue;
            };
            let mut t = tracker.lock();
            if t.is_retired() {
                t.rebase();
                tracing::debug!(key = %key, recovering = t.is_recovering(), "Sequence baseline reset");
            }
        }
    }

    pub fn status(&self, key: &SubscriptionKey) -> Option<TrackerStatus> {
        self.trackers.get(key).map(|t| t.lock().status())
    }

    /// True if any key has an outstanding gap or held messages
    pub fn is_recovering(&self) -> bool {
        self.trackers
            .iter()
            .any(|entry| entry.value().lock().is_recovering())
    }

    fn tracker(&self, key: &SubscriptionKey) -> SharedTracker {
        self.trackers
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(SequenceTracker::new())))
            .clone()
    }

    fn hold(&self, tracker: &mut SequenceTracker, key: &SubscriptionKey, message: Message) {
        let sequence = message.sequence();
        if !tracker.hold(message, self.config.max_held_messages) {
            self.stats.record_held_overflow();
            tracing::warn!(
                key = %key,
                sequence,
                max_held = self.config.max_held_messages,
                "Held buffer full, message will be refetched"
            );
        }
    }

    fn spawn_worker(self: &Arc<Self>, key: SubscriptionKey, tracker: SharedTracker) {
        let cancel = self.cancel.lock().clone();
        let coordinator = Arc::clone(self);
        let handle = tokio::spawn(async move {
            coordinator.run_worker(key, tracker, cancel).await;
        });

        let mut workers = self.workers.lock();
        workers.retain(|w| !w.is_finished());
        workers.push(handle);
    }

    async fn run_worker(&self, key: SubscriptionKey, tracker: SharedTracker, cancel: CancellationToken) {
        loop {
            let step = {
                let mut t = tracker.lock();
                if cancel.is_cancelled() {
                    t.release_worker();
                    return;
                }
                let ready = t.drain_ready();
                if !ready.is_empty() {
                    WorkerStep::Deliver(ready)
                } else if let Some(range) = t.take_pending() {
                    WorkerStep::Fetch(range)
                } else {
                    t.release_worker();
                    WorkerStep::Done
                }
            };

            match step {
                WorkerStep::Deliver(messages) => {
                    for message in &messages {
                        self.chain.dispatch(message).await;
                        self.stats.record_delivered();
                    }
                }
                WorkerStep::Fetch(range) => self.recover(&key, &tracker, range, &cancel).await,
                WorkerStep::Done => return,
            }
        }
    }

    async fn recover(
        &self,
        key: &SubscriptionKey,
        tracker: &SharedTracker,
        range: GapRange,
        cancel: &CancellationToken,
    ) {
        match self.fetch_with_retry(key, range, cancel).await {
            Ok(fetched) => {
                let fetched: Vec<Message> = fetched.into_iter().filter(|m| &m.key() == key).collect();
                let count = fetched.len();
                let missing = tracker.lock().complete(range, fetched);
                self.stats.record_backfilled(count as u64);

                if missing.is_empty() {
                    self.stats.record_gap_recovered();
                    tracing::info!(
                        event = "gap_recovered",
                        key = %key,
                        low = range.low(),
                        high = range.high(),
                        fetched = count,
                        "Gap recovered"
                    );
                }
                for hole in missing {
                    self.stats.record_unrecoverable_gap();
                    tracing::error!(
                        event = "unrecoverable_gap",
                        key = %key,
                        low = hole.low(),
                        high = hole.high(),
                        missing = hole.len(),
                        "Backfill returned an incomplete range"
                    );
                }
            }
            Err(RecoveryError::Cancelled) => {
                tracing::info!(key = %key, low = range.low(), high = range.high(), "Gap recovery interrupted");
                tracker.lock().requeue(range);
            }
            Err(e) => {
                tracker.lock().abandon(range);
                self.stats.record_unrecoverable_gap();
                tracing::error!(
                    event = "unrecoverable_gap",
                    key = %key,
                    low = range.low(),
                    high = range.high(),
                    missing = range.len(),
                    error = %e,
                    "Gap could not be recovered"
                );
            }
        }
    }

    async fn fetch_with_retry(
        &self,
        key: &SubscriptionKey,
        range: GapRange,
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>, RecoveryError> {
        let attempts = self.config.max_attempts.max(1);
        let mut backoff = ReconnectBackoff::new(self.config.retry_backoff.clone());
        let mut last = FetchError::Timeout;

        for attempt in 1..=attempts {
            let fetch = timeout(
                self.config.fetch_timeout,
                self.backfill
                    .fetch_range(&key.product, key.channel, range.low(), range.high()),
            );
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(RecoveryError::Cancelled),
                result = fetch => result,
            };

            match result {
                Ok(Ok(messages)) => return Ok(messages),
                Ok(Err(e)) => last = e,
                Err(_) => last = FetchError::Timeout,
            }
            tracing::warn!(
                key = %key,
                low = range.low(),
                high = range.high(),
                attempt,
                attempts,
                error = %last,
                "Backfill fetch failed"
            );

            if attempt < attempts {
                let delay = backoff.next_delay();
                tokio::select! {
                    _ = cancel.cancelled() => return Err(RecoveryError::Cancelled),
                    _ = sleep(delay) => {}
                }
            }
        }

        Err(RecoveryError::Exhausted { attempts, last })
    }
}
