//! Subscription reconciliation
//!
//! Callers edit the desired set at any time. The connection drains the
//! difference between desired and applied state as a `SubscriptionDelta`
//! when a session is streaming, and replays the whole desired set on every
//! new session.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tickvault_core::{Channel, ProductId, SubscriptionKey};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredState {
    Subscribed,
    Unsubscribed,
}

/// Desired and applied state of one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionEntry {
    pub key: SubscriptionKey,
    pub desired: DesiredState,
    /// Whether the live session has (or is being sent) this subscription
    pub applied: bool,
}

impl SubscriptionEntry {
    fn is_drifted(&self) -> bool {
        (self.desired == DesiredState::Subscribed) != self.applied
    }
}

/// Requests needed to bring the session in line with the desired set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionDelta {
    pub subscribe: Vec<SubscriptionKey>,
    pub unsubscribe: Vec<SubscriptionKey>,
}

impl SubscriptionDelta {
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }
}

/// Wake-up for the reconciler. Requests made before the reconciler gets to
/// run collapse into a single wake-up.
#[derive(Debug, Clone, Default)]
pub struct ReconcileSignal {
    notify: Arc<Notify>,
}

impl ReconcileSignal {
    pub fn request(&self) {
        self.notify.notify_one();
    }

    pub async fn requested(&self) {
        self.notify.notified().await;
    }
}

struct Table {
    channels: Vec<Channel>,
    entries: BTreeMap<SubscriptionKey, SubscriptionEntry>,
}

/// Shared desired/applied subscription table
#[derive(Clone)]
pub struct SubscriptionSet {
    table: Arc<Mutex<Table>>,
    signal: ReconcileSignal,
}

impl SubscriptionSet {
    /// `channels` are subscribed for every product added
    pub fn new(channels: Vec<Channel>) -> Self {
        let mut channels = channels;
        channels.sort();
        channels.dedup();

        SubscriptionSet {
            table: Arc::new(Mutex::new(Table {
                channels,
                entries: BTreeMap::new(),
            })),
            signal: ReconcileSignal::default(),
        }
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.table.lock().channels.clone()
    }

    pub fn signal(&self) -> ReconcileSignal {
        self.signal.clone()
    }

    /// Mark every configured channel of `product` as desired.
    ///
    /// Returns false if nothing changed.
    pub fn add_product(&self, product: impl Into<ProductId>) -> bool {
        let product = product.into();
        let changed = {
            let mut table = self.table.lock();
            let channels = table.channels.clone();
            let mut changed = false;
            for channel in channels {
                let key = SubscriptionKey::new(product.clone(), channel);
                let entry = table
                    .entries
                    .entry(key.clone())
                    .or_insert(SubscriptionEntry {
                        key,
                        desired: DesiredState::Unsubscribed,
                        applied: false,
                    });
                if entry.desired != DesiredState::Subscribed {
                    entry.desired = DesiredState::Subscribed;
                    changed = true;
                }
            }
            changed
        };

        if changed {
            tracing::debug!(product = %product, "Product added to desired set");
            self.signal.request();
        }
        changed
    }

    /// Mark every channel of `product` as undesired.
    ///
    /// Removing a product that is not desired is a no-op and produces no
    /// traffic.
    pub fn remove_product(&self, product: impl Into<ProductId>) -> bool {
        let product = product.into();
        let changed = {
            let mut table = self.table.lock();
            let mut changed = false;
            table.entries.retain(|key, entry| {
                if key.product != product || entry.desired == DesiredState::Unsubscribed {
                    return true;
                }
                changed = true;
                entry.desired = DesiredState::Unsubscribed;
                // Never sent, so there is nothing to undo on the wire
                entry.applied
            });
            changed
        };

        if changed {
            tracing::debug!(product = %product, "Product removed from desired set");
            self.signal.request();
        }
        changed
    }

    /// Keys currently desired, in key order
    pub fn desired(&self) -> Vec<SubscriptionKey> {
        self.table
            .lock()
            .entries
            .values()
            .filter(|e| e.desired == DesiredState::Subscribed)
            .map(|e| e.key.clone())
            .collect()
    }

    /// Keys the live session currently carries
    pub fn applied(&self) -> Vec<SubscriptionKey> {
        self.table
            .lock()
            .entries
            .values()
            .filter(|e| e.applied)
            .map(|e| e.key.clone())
            .collect()
    }

    pub fn entry(&self, key: &SubscriptionKey) -> Option<SubscriptionEntry> {
        self.table.lock().entries.get(key).cloned()
    }

    pub fn is_reconciled(&self) -> bool {
        !self.table.lock().entries.values().any(|e| e.is_drifted())
    }

    /// Drain the pending difference and mark it applied.
    ///
    /// If sending the delta fails the caller hands it back via `restore`.
    pub fn take_delta(&self) -> SubscriptionDelta {
        let mut table = self.table.lock();
        let mut delta = SubscriptionDelta::default();

        for entry in table.entries.values_mut() {
            match (entry.desired, entry.applied) {
                (DesiredState::Subscribed, false) => {
                    entry.applied = true;
                    delta.subscribe.push(entry.key.clone());
                }
                (DesiredState::Unsubscribed, true) => {
                    entry.applied = false;
                    delta.unsubscribe.push(entry.key.clone());
                }
                _ => {}
            }
        }

        table
            .entries
            .retain(|_, e| e.desired == DesiredState::Subscribed || e.applied);
        delta
    }

    /// Undo the applied marks of a delta that never reached the exchange.
    ///
    /// Does not signal; the restored keys go out with the next reconciliation.
    pub fn restore(&self, delta: &SubscriptionDelta) {
        let mut table = self.table.lock();
        for key in &delta.subscribe {
            if let Some(entry) = table.entries.get_mut(key) {
                entry.applied = false;
            }
        }
        for key in &delta.unsubscribe {
            table
                .entries
                .entry(key.clone())
                .and_modify(|e| e.applied = true)
                .or_insert(SubscriptionEntry {
                    key: key.clone(),
                    desired: DesiredState::Unsubscribed,
                    applied: true,
                });
        }
    }

    /// Desired set for a brand new session, marked applied
    pub fn full_subscribe(&self) -> Vec<SubscriptionKey> {
        let mut table = self.table.lock();
        table
            .entries
            .retain(|_, e| e.desired == DesiredState::Subscribed);
        table
            .entries
            .values_mut()
            .map(|e| {
                e.applied = true;
                e.key.clone()
            })
            .collect()
    }

    /// Forget applied state after the session is discarded
    pub fn reset_applied(&self) {
        let mut table = self.table.lock();
        for entry in table.entries.values_mut() {
            entry.applied = false;
        }
        table
            .entries
            .retain(|_, e| e.desired == DesiredState::Subscribed);
    }
}
