//! Infrastructure Layer - adapters behind the ports
//!
//! - WsTransport: WebSocket sessions to the exchange feed
//! - RestBackfillClient: HTTP client for historical ranges
//! - JsonFeedCodec: exchange JSON wire format
//! - JsonLinesSink: append-only file storage

pub mod json_codec;
pub mod jsonl_sink;
pub mod rest_backfill;
pub mod ws_transport;

pub use json_codec::JsonFeedCodec;
pub use jsonl_sink::JsonLinesSink;
pub use rest_backfill::{RestBackfillClient, RestError};
pub use ws_transport::{WsError, WsSession, WsTransport};
