use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Trading product identifier (e.g. "BTC-USD")
///
/// Products are normalized to uppercase, so "btc-usd" and "BTC-USD" name
/// the same product.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ProductId(String);

impl ProductId {
    /// Create a new product ID (normalized to uppercase)
    pub fn new(id: impl Into<String>) -> Self {
        ProductId(id.into().trim().to_uppercase())
    }

    /// Get the product ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProductId {
    fn from(s: &str) -> Self {
        ProductId::new(s)
    }
}

impl From<String> for ProductId {
    fn from(s: String) -> Self {
        ProductId::new(s)
    }
}

impl From<ProductId> for String {
    fn from(id: ProductId) -> Self {
        id.0
    }
}

/// Exchange feed channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Heartbeat,
    Status,
    Ticker,
    Level2,
    Matches,
    Full,
}

impl Channel {
    pub const ALL: [Channel; 6] = [
        Channel::Heartbeat,
        Channel::Status,
        Channel::Ticker,
        Channel::Level2,
        Channel::Matches,
        Channel::Full,
    ];

    /// Wire name of the channel
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Heartbeat => "heartbeat",
            Channel::Status => "status",
            Channel::Ticker => "ticker",
            Channel::Level2 => "level2",
            Channel::Matches => "matches",
            Channel::Full => "full",
        }
    }

    /// True if consecutive messages on this channel carry consecutive
    /// sequence numbers. Heartbeat, ticker and matches messages sample the
    /// full feed's numbering, so jumps there are not gaps.
    pub fn is_gap_checked(&self) -> bool {
        matches!(self, Channel::Full)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseChannelError(pub String);

impl fmt::Display for ParseChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown channel: {}", self.0)
    }
}

impl std::error::Error for ParseChannelError {}

impl FromStr for Channel {
    type Err = ParseChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        Channel::ALL
            .into_iter()
            .find(|c| c.as_str() == lowered)
            .ok_or_else(|| ParseChannelError(s.to_string()))
    }
}

/// A (product, channel) pair - the unit of subscription and sequencing
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriptionKey {
    pub product: ProductId,
    pub channel: Channel,
}

impl SubscriptionKey {
    pub fn new(product: impl Into<ProductId>, channel: Channel) -> Self {
        SubscriptionKey {
            product: product.into(),
            channel,
        }
    }

    /// Parse from "channel:product" format
    pub fn parse(s: &str) -> Option<Self> {
        let (channel, product) = s.split_once(':')?;
        let channel = channel.parse().ok()?;
        if product.trim().is_empty() {
            return None;
        }
        Some(SubscriptionKey::new(product, channel))
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel, self.product)
    }
}

/// Identity of one physical transport session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
