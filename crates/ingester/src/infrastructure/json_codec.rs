use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tickvault_core::{Channel, Message, ProductId, SubscriptionKey};
use tickvault_ports::{CodecError, FeedCodec, FeedEvent, FeedRequest};
use tracing::debug;

/// Coinbase-style JSON codec
///
/// Every frame is an object tagged by `type`. Sequenced event types become
/// `FeedEvent::Data`; snapshots, level-2 updates and status frames carry no
/// sequence number and are ignored.
pub struct JsonFeedCodec {
    /// Channels subscribed; decides which channel an ambiguous type maps to
    channels: Vec<Channel>,
}

impl Default for JsonFeedCodec {
    fn default() -> Self {
        Self::new(vec![Channel::Full])
    }
}

impl JsonFeedCodec {
    pub fn new(channels: Vec<Channel>) -> Self {
        JsonFeedCodec { channels }
    }

    /// Decode one already-parsed JSON object
    pub fn decode_value(&self, value: Value) -> Result<FeedEvent, CodecError> {
        let kind = value
            .get("type")
            .ok_or(CodecError::MissingField("type"))?
            .as_str()
            .ok_or_else(|| CodecError::Malformed("`type` is not a string".into()))?
            .to_string();

        match kind.as_str() {
            "subscriptions" => Ok(FeedEvent::SubscribeAck(parse_subscriptions(&value)?)),
            "error" => Ok(FeedEvent::ExchangeError {
                message: value
                    .get("message")
                    .or_else(|| value.get("msg"))
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
                reason: value
                    .get("reason")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }),
            other => match self.channel_for(other, &value) {
                Some(channel) => self.decode_message(channel, kind, value).map(FeedEvent::Data),
                None => {
                    debug!(kind = %kind, "Unsequenced or unknown message type");
                    Ok(FeedEvent::Ignored { kind })
                }
            },
        }
    }

    /// Decode a sequenced message object, as returned by the backfill API
    pub fn decode_data(&self, value: Value) -> Result<Message, CodecError> {
        match self.decode_value(value)? {
            FeedEvent::Data(message) => Ok(message),
            _ => Err(CodecError::Malformed("not a sequenced message".into())),
        }
    }

    fn channel_for(&self, kind: &str, value: &Value) -> Option<Channel> {
        let default = match kind {
            "heartbeat" => Channel::Heartbeat,
            "ticker" => Channel::Ticker,
            "match" | "last_match" if !self.channels.contains(&Channel::Full) => Channel::Matches,
            "match" | "last_match" | "received" | "open" | "done" | "change" | "activate" => {
                Channel::Full
            }
            _ => return None,
        };

        // An explicit channel wins over the type-derived one
        let explicit = value
            .get("channel")
            .and_then(Value::as_str)
            .and_then(|c| c.parse::<Channel>().ok());
        Some(explicit.unwrap_or(default))
    }

    fn decode_message(
        &self,
        channel: Channel,
        kind: String,
        value: Value,
    ) -> Result<Message, CodecError> {
        let product = value
            .get("product_id")
            .ok_or(CodecError::MissingField("product_id"))?
            .as_str()
            .ok_or_else(|| CodecError::Malformed("`product_id` is not a string".into()))?;
        let sequence = value
            .get("sequence")
            .ok_or(CodecError::MissingField("sequence"))?
            .as_u64()
            .ok_or_else(|| {
                CodecError::Malformed("`sequence` is not a non-negative integer".into())
            })?;

        Ok(Message::new(
            ProductId::new(product),
            channel,
            sequence,
            kind,
            value,
            Utc::now(),
        ))
    }
}

impl FeedCodec for JsonFeedCodec {
    fn parse(&self, text: &str) -> Result<FeedEvent, CodecError> {
        let value: Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(CodecError::Malformed("frame is not a JSON object".into()));
        }
        self.decode_value(value)
    }

    fn encode(&self, request: &FeedRequest) -> Result<String, CodecError> {
        #[derive(Serialize)]
        struct ChannelSpec {
            name: Channel,
            product_ids: Vec<String>,
        }

        #[derive(Serialize)]
        struct Request {
            #[serde(rename = "type")]
            kind: &'static str,
            channels: Vec<ChannelSpec>,
        }

        let mut grouped: BTreeMap<Channel, Vec<String>> = BTreeMap::new();
        for key in request.keys() {
            grouped
                .entry(key.channel)
                .or_default()
                .push(key.product.to_string());
        }

        let body = Request {
            kind: request.label(),
            channels: grouped
                .into_iter()
                .map(|(name, product_ids)| ChannelSpec { name, product_ids })
                .collect(),
        };
        serde_json::to_string(&body).map_err(|e| CodecError::Encode(e.to_string()))
    }
}

/// `channels` is a list of either bare names or `{name, product_ids}` objects
fn parse_subscriptions(value: &Value) -> Result<Vec<SubscriptionKey>, CodecError> {
    let channels = value
        .get("channels")
        .ok_or(CodecError::MissingField("channels"))?
        .as_array()
        .ok_or_else(|| CodecError::Malformed("`channels` is not an array".into()))?;

    let mut keys = Vec::new();
    for spec in channels {
        let (name, products) = match spec {
            Value::String(name) => (name.as_str(), None),
            Value::Object(obj) => (
                obj.get("name")
                    .and_then(Value::as_str)
                    .ok_or(CodecError::MissingField("name"))?,
                obj.get("product_ids").and_then(Value::as_array),
            ),
            _ => return Err(CodecError::Malformed("unexpected channel entry".into())),
        };

        // Channels the exchange offers but we do not model are skipped
        let Ok(channel) = name.parse::<Channel>() else {
            debug!(channel = %name, "Skipping unknown channel in subscriptions");
            continue;
        };
        for product in products.into_iter().flatten().filter_map(Value::as_str) {
            keys.push(SubscriptionKey::new(product, channel));
        }
    }
    Ok(keys)
}
