use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tickvault_core::{Message, SequenceNumber, SubscriptionKey, Timestamp};
use tickvault_ports::MessageSink;

use super::pipeline::{MessageVisitor, VisitorError};

/// Appends every message to a sink
pub struct PersistenceVisitor {
    sink: Arc<dyn MessageSink>,
}

impl PersistenceVisitor {
    pub fn new(sink: Arc<dyn MessageSink>) -> Self {
        PersistenceVisitor { sink }
    }
}

#[async_trait]
impl MessageVisitor for PersistenceVisitor {
    fn name(&self) -> &str {
        "persistence"
    }

    async fn visit(&self, message: &Message) -> Result<(), VisitorError> {
        self.sink.append(message).await?;
        Ok(())
    }

    async fn flush(&self) -> Result<(), VisitorError> {
        self.sink.flush().await?;
        Ok(())
    }
}

/// Per-key delivery counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyMetrics {
    pub delivered: u64,
    pub last_sequence: SequenceNumber,
    pub last_received_at: Timestamp,
}

#[derive(Default)]
pub struct MetricsVisitor {
    per_key: DashMap<SubscriptionKey, KeyMetrics>,
}

impl MetricsVisitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &SubscriptionKey) -> Option<KeyMetrics> {
        self.per_key.get(key).map(|m| *m)
    }

    pub fn total(&self) -> u64 {
        self.per_key.iter().map(|m| m.delivered).sum()
    }

    pub fn snapshot(&self) -> Vec<(SubscriptionKey, KeyMetrics)> {
        let mut all: Vec<_> = self
            .per_key
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}

#[async_trait]
impl MessageVisitor for MetricsVisitor {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn visit(&self, message: &Message) -> Result<(), VisitorError> {
        self.per_key
            .entry(message.key())
            .and_modify(|m| {
                m.delivered += 1;
                m.last_sequence = message.sequence();
                m.last_received_at = message.received_at();
            })
            .or_insert(KeyMetrics {
                delivered: 1,
                last_sequence: message.sequence(),
                last_received_at: message.received_at(),
            });
        Ok(())
    }
}
