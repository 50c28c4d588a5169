use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tickvault_core::{Channel, Message, ProductId, SequenceNumber};
use tickvault_ports::{BackfillSource, FetchError};

use super::json_codec::JsonFeedCodec;

#[derive(Error, Debug)]
pub enum RestError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {code} - {msg}")]
    Api { code: u16, msg: String },
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Convert infrastructure RestError to domain FetchError
impl From<RestError> for FetchError {
    fn from(err: RestError) -> Self {
        match err {
            RestError::Http(e) if e.is_timeout() => FetchError::Timeout,
            RestError::Http(e) => FetchError::Network(e.to_string()),
            RestError::Api { code, msg } => FetchError::Api { code, message: msg },
            RestError::Parse(msg) => FetchError::Parse(msg),
        }
    }
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

/// REST client for historical messages
/// Infrastructure component - handles HTTP communication
///
/// `GET {base}/products/{product}/messages?channel=..&from=..&to=..`
/// returns a JSON array of feed messages in the same shape as the stream.
#[derive(Clone)]
pub struct RestBackfillClient {
    client: Client,
    base_url: String,
    codec: Arc<JsonFeedCodec>,
}

impl RestBackfillClient {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        codec: Arc<JsonFeedCodec>,
    ) -> Result<Self, RestError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(RestBackfillClient {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            codec,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the raw messages for an inclusive sequence range
    pub async fn get_messages(
        &self,
        product: &ProductId,
        channel: Channel,
        from: SequenceNumber,
        to: SequenceNumber,
    ) -> Result<Vec<Message>, RestError> {
        let url = format!("{}/products/{}/messages", self.base_url, product);
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("channel", channel.as_str().to_string()),
                ("from", from.to_string()),
                ("to", to.to_string()),
            ])
            .send()
            .await?;

        let values: Vec<Value> = self.handle_response(resp).await?;
        self.decode_messages(values)
    }

    fn decode_messages(&self, values: Vec<Value>) -> Result<Vec<Message>, RestError> {
        let mut messages = values
            .into_iter()
            .map(|v| self.codec.decode_data(v))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| RestError::Parse(e.to_string()))?;
        messages.sort_by_key(|m| m.sequence());
        Ok(messages)
    }

    async fn handle_response(&self, resp: reqwest::Response) -> Result<Vec<Value>, RestError> {
        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            if let Ok(err) = serde_json::from_str::<ApiError>(&text) {
                return Err(RestError::Api {
                    code: status.as_u16(),
                    msg: err.message,
                });
            }
            return Err(RestError::Api {
                code: status.as_u16(),
                msg: text,
            });
        }

        serde_json::from_str(&text).map_err(|e| RestError::Parse(e.to_string()))
    }
}

#[async_trait]
impl BackfillSource for RestBackfillClient {
    async fn fetch_range(
        &self,
        product: &ProductId,
        channel: Channel,
        from: SequenceNumber,
        to: SequenceNumber,
    ) -> Result<Vec<Message>, FetchError> {
        tracing::debug!(product = %product, channel = %channel, from, to, "Fetching backfill range");
        Ok(self.get_messages(product, channel, from, to).await?)
    }
}
