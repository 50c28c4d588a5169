//! Tickvault Ingester
//!
//! Keeps a market-data feed connected, subscribed and gap-free:
//! - **Config**: JSON configuration with validated defaults
//! - **Application**: connection state machine, subscription reconciliation,
//!   sequence tracking, gap recovery and the visitor chain
//! - **Infrastructure**: WebSocket transport, JSON codec, REST backfill and
//!   JSON-lines storage
//!
//! # Architecture
//!
//! ```text
//!   WebSocket feed                          REST API
//!        │ frames                               ▲ fetch_range
//!   ┌────▼───────────┐   ┌──────────────┐  ┌────┴──────────────────┐
//!   │ FeedConnection │──►│MessagePipeline│─►│GapRecoveryCoordinator │
//!   │ (state machine)│   │ (FeedCodec)  │  │ (SequenceTracker/key) │
//!   └────▲───────────┘   └──────────────┘  └────┬──────────────────┘
//!        │ reconcile                            │ in order
//!   ┌────┴───────────┐                     ┌────▼──────────────────┐
//!   │SubscriptionSet │                     │ VisitorChain          │
//!   └────────────────┘                     │ persistence → metrics │
//!                                          └───────────────────────┘
//! ```

pub mod application;
pub mod config;
pub mod infrastructure;
pub mod ingester;

// Re-export commonly used types for convenience
pub use application::{
    ConnectionConfig, ConnectionState, FeedConnection, GapRecoveryCoordinator, LifecycleError,
    MessagePipeline, MessageVisitor, MetricsVisitor, PersistenceVisitor, RecoveryConfig,
    SubscriptionSet, VisitorChain,
};
pub use config::{ConfigError, IngesterConfigFile, load_config, load_default_config};
pub use infrastructure::{JsonFeedCodec, JsonLinesSink, RestBackfillClient, WsTransport};
pub use ingester::{Ingester, IngesterError, IngesterStats};
