use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::identifiers::{Channel, ProductId, SubscriptionKey};

/// Per-(product, channel) exchange sequence number
pub type SequenceNumber = u64;

/// Timestamp in UTC
pub type Timestamp = DateTime<Utc>;

/// A parsed exchange event
///
/// Immutable once constructed: fields are only reachable through accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    product: ProductId,
    channel: Channel,
    sequence: SequenceNumber,
    /// Exchange event type (e.g. "match", "ticker")
    kind: String,
    /// Raw exchange payload
    payload: Value,
    received_at: Timestamp,
}

impl Message {
    pub fn new(
        product: impl Into<ProductId>,
        channel: Channel,
        sequence: SequenceNumber,
        kind: impl Into<String>,
        payload: Value,
        received_at: Timestamp,
    ) -> Self {
        Message {
            product: product.into(),
            channel,
            sequence,
            kind: kind.into(),
            payload,
            received_at,
        }
    }

    pub fn product(&self) -> &ProductId {
        &self.product
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn received_at(&self) -> Timestamp {
        self.received_at
    }

    /// The (product, channel) key this message is sequenced under
    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey::new(self.product.clone(), self.channel)
    }
}

/// Inclusive range of missing sequence numbers, never inverted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GapRange {
    low: SequenceNumber,
    high: SequenceNumber,
}

impl GapRange {
    /// Returns None when `low > high`
    pub fn new(low: SequenceNumber, high: SequenceNumber) -> Option<Self> {
        (low <= high).then_some(GapRange { low, high })
    }

    pub fn single(sequence: SequenceNumber) -> Self {
        GapRange {
            low: sequence,
            high: sequence,
        }
    }

    pub fn low(&self) -> SequenceNumber {
        self.low
    }

    pub fn high(&self) -> SequenceNumber {
        self.high
    }

    /// Number of sequence numbers in the range
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.high - self.low + 1
    }

    pub fn contains(&self, sequence: SequenceNumber) -> bool {
        self.low <= sequence && sequence <= self.high
    }

    /// Smallest range covering both
    pub fn merge(&self, other: &GapRange) -> GapRange {
        GapRange {
            low: self.low.min(other.low),
            high: self.high.max(other.high),
        }
    }
}

impl fmt::Display for GapRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}..={}]", self.low, self.high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_key() {
        let msg = Message::new(
            "btc-usd",
            Channel::Matches,
            42,
            "match",
            json!({"price": "100"}),
            Utc::now(),
        );
        assert_eq!(msg.key(), SubscriptionKey::new("BTC-USD", Channel::Matches));
        assert_eq!(msg.sequence(), 42);
        assert_eq!(msg.kind(), "match");
    }

    #[test]
    fn test_gap_range_bounds() {
        assert!(GapRange::new(5, 4).is_none());

        let gap = GapRange::new(3, 4).unwrap();
        assert_eq!(gap.len(), 2);
        assert!(gap.contains(3));
        assert!(gap.contains(4));
        assert!(!gap.contains(5));
        assert_eq!(gap.to_string(), "[3..=4]");
        assert_eq!((gap.low(), gap.high()), (3, 4));

        let single = GapRange::single(7);
        assert_eq!(single.len(), 1);
        assert_eq!(GapRange::new(7, 7), Some(single));
    }

    #[test]
    fn test_gap_range_merge() {
        let a = GapRange::new(3, 4).unwrap();
        let b = GapRange::new(6, 8).unwrap();
        assert_eq!(a.merge(&b), GapRange::new(3, 8).unwrap());
        assert_eq!(b.merge(&a), GapRange::new(3, 8).unwrap());
    }
}
