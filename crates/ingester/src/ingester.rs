//! Wiring of the production ingester from a config file

use std::sync::Arc;
use thiserror::Error;
use tickvault_core::{ProductId, SubscriptionKey};
use tickvault_ports::WriteError;

use crate::application::{
    ConnectionState, ConnectionStatsSnapshot, FeedConnection, GapRecoveryCoordinator,
    KeyMetrics, LifecycleError, MessagePipeline, MetricsVisitor, PersistenceVisitor,
    PipelineStats, PipelineStatsSnapshot, SubscriptionSet, VisitorChain,
};
use crate::config::IngesterConfigFile;
use crate::infrastructure::{
    JsonFeedCodec, JsonLinesSink, RestBackfillClient, RestError, WsError, WsTransport,
};

#[derive(Error, Debug)]
pub enum IngesterError {
    #[error("WebSocket setup failed: {0}")]
    WebSocket(#[from] WsError),
    #[error("REST client setup failed: {0}")]
    Rest(#[from] RestError),
    #[error("Storage setup failed: {0}")]
    Storage(#[from] WriteError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// Counters gathered from every layer
#[derive(Debug, Clone)]
pub struct IngesterStats {
    pub connection: ConnectionStatsSnapshot,
    pub pipeline: PipelineStatsSnapshot,
    pub per_key: Vec<(SubscriptionKey, KeyMetrics)>,
}

/// Production ingester: WebSocket in, JSON lines out
pub struct Ingester {
    connection: FeedConnection<WsTransport>,
    metrics: Arc<MetricsVisitor>,
    stats: Arc<PipelineStats>,
}

impl Ingester {
    pub fn from_config(config: &IngesterConfigFile) -> Result<Self, IngesterError> {
        let connection_config = config.connection.to_connection_config();
        let recovery_config = config.recovery.to_recovery_config();

        let codec = Arc::new(JsonFeedCodec::new(config.channels.clone()));
        let transport = WsTransport::new(&config.feed.ws_url)?;
        let backfill = RestBackfillClient::new(
            config.feed.rest_url.as_str(),
            recovery_config.fetch_timeout,
            Arc::clone(&codec),
        )?;
        let sink = JsonLinesSink::new(&config.storage.directory)?;

        let stats = Arc::new(PipelineStats::new());
        let metrics = Arc::new(MetricsVisitor::new());
        let chain = VisitorChain::new(Arc::clone(&stats))
            .with(Arc::new(PersistenceVisitor::new(Arc::new(sink))))
            .with(metrics.clone());

        let coordinator = Arc::new(GapRecoveryCoordinator::new(
            Arc::new(chain),
            Arc::new(backfill),
            recovery_config,
            Arc::clone(&stats),
        ));
        let pipeline = Arc::new(MessagePipeline::new(
            codec,
            coordinator,
            Arc::clone(&stats),
        ));

        let subscriptions = SubscriptionSet::new(config.channels.clone());
        for product in &config.products {
            subscriptions.add_product(product.as_str());
        }

        tracing::info!(
            ws_url = %config.feed.ws_url,
            rest_url = %config.feed.rest_url,
            products = ?config.products,
            channels = ?config.channels,
            "Ingester configured"
        );

        Ok(Ingester {
            connection: FeedConnection::new(
                transport,
                connection_config,
                subscriptions,
                pipeline,
            ),
            metrics,
            stats,
        })
    }

    pub fn add_product(&self, product: impl Into<ProductId>) -> bool {
        self.connection.subscriptions().add_product(product)
    }

    pub fn remove_product(&self, product: impl Into<ProductId>) -> bool {
        self.connection.subscriptions().remove_product(product)
    }

    pub fn start(&self) -> Result<(), IngesterError> {
        Ok(self.connection.start()?)
    }

    pub async fn stop(&self) {
        self.connection.stop().await;
    }

    pub async fn wait(&self) {
        self.connection.wait().await;
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn connection(&self) -> &FeedConnection<WsTransport> {
        &self.connection
    }

    pub fn stats(&self) -> IngesterStats {
        IngesterStats {
            connection: self.connection.stats(),
            pipeline: self.stats.snapshot(),
            per_key: self.metrics.snapshot(),
        }
    }
}
