use tickvault_core::{Message, SubscriptionKey};

use crate::error::CodecError;

/// Result of parsing one text frame
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Exchange confirmed the current subscription set
    SubscribeAck(Vec<SubscriptionKey>),
    /// Sequenced market-data event
    Data(Message),
    /// Exchange-reported error payload
    ExchangeError {
        message: String,
        reason: Option<String>,
    },
    /// Well-formed but not ingested (unsequenced or unknown type)
    Ignored { kind: String },
}

/// Outbound subscription requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedRequest {
    Subscribe(Vec<SubscriptionKey>),
    Unsubscribe(Vec<SubscriptionKey>),
}

impl FeedRequest {
    pub fn keys(&self) -> &[SubscriptionKey] {
        match self {
            FeedRequest::Subscribe(keys) | FeedRequest::Unsubscribe(keys) => keys,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FeedRequest::Subscribe(_) => "subscribe",
            FeedRequest::Unsubscribe(_) => "unsubscribe",
        }
    }
}

/// Port for the exchange wire format
///
/// Implements Open/Closed - a new exchange format is a new codec, the
/// connection and pipeline stay untouched.
pub trait FeedCodec: Send + Sync + 'static {
    fn parse(&self, text: &str) -> Result<FeedEvent, CodecError>;

    fn encode(&self, request: &FeedRequest) -> Result<String, CodecError>;
}
