//! Message pipeline
//!
//! ```text
//! Frame ──► classify ──► parse ──► sequence check ──► VisitorChain
//!              │           │             │              (persist, metrics, ...)
//!              │           │             └──► gap ──► GapRecoveryCoordinator
//!              │           └──► parse error: logged, dropped
//!              └──► close / error: session ends
//! ```
//!
//! Every step fails locally. A failing visitor never stops the visitors
//! after it, and no message failure ever ends the session.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tickvault_core::{Frame, GapRange, Message, SubscriptionKey};
use tickvault_ports::{FeedCodec, FeedEvent, WriteError};

use super::recovery::{AdmitOutcome, GapRecoveryCoordinator};
use super::stats::PipelineStats;

#[derive(Error, Debug)]
pub enum VisitorError {
    #[error("Write failed: {0}")]
    Write(#[from] WriteError),
    #[error("{0}")]
    Other(String),
}

/// One step of message handling
#[async_trait]
pub trait MessageVisitor: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn visit(&self, message: &Message) -> Result<(), VisitorError>;

    async fn flush(&self) -> Result<(), VisitorError> {
        Ok(())
    }
}

/// Ordered list of visitors, composed once at startup
pub struct VisitorChain {
    visitors: Vec<Arc<dyn MessageVisitor>>,
    stats: Arc<PipelineStats>,
}

impl VisitorChain {
    pub fn new(stats: Arc<PipelineStats>) -> Self {
        VisitorChain {
            visitors: Vec::new(),
            stats,
        }
    }

    /// Append a visitor at the end of the chain
    pub fn with(mut self, visitor: Arc<dyn MessageVisitor>) -> Self {
        self.visitors.push(visitor);
        self
    }

    pub fn push(&mut self, visitor: Arc<dyn MessageVisitor>) {
        self.visitors.push(visitor);
    }

    /// Insert a visitor at `index`, shifting later ones back
    pub fn insert(&mut self, index: usize, visitor: Arc<dyn MessageVisitor>) {
        let index = index.min(self.visitors.len());
        self.visitors.insert(index, visitor);
    }

    pub fn names(&self) -> Vec<&str> {
        self.visitors.iter().map(|v| v.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.visitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visitors.is_empty()
    }

    /// Run every visitor for `message`. Returns the number that failed.
    pub async fn dispatch(&self, message: &Message) -> usize {
        let mut failures = 0;
        for visitor in &self.visitors {
            if let Err(e) = visitor.visit(message).await {
                failures += 1;
                self.stats.record_visitor_error();
                tracing::error!(
                    visitor = visitor.name(),
                    key = %message.key(),
                    sequence = message.sequence(),
                    error = %e,
                    "Visitor failed"
                );
            }
        }
        failures
    }

    pub async fn flush(&self) {
        for visitor in &self.visitors {
            if let Err(e) = visitor.flush().await {
                tracing::error!(visitor = visitor.name(), error = %e, "Visitor flush failed");
            }
        }
    }
}

/// What happened to one inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Delivered,
    /// Parked behind a gap that is being repaired
    Held,
    Duplicate,
    GapDetected(GapRange),
    SubscribeAck(Vec<SubscriptionKey>),
    ExchangeError(String),
    ParseFailed,
    Ignored,
    /// The session is unusable; carries a short reason
    SessionEnded(String),
}

pub struct MessagePipeline {
    codec: Arc<dyn FeedCodec>,
    coordinator: Arc<GapRecoveryCoordinator>,
    stats: Arc<PipelineStats>,
}

impl MessagePipeline {
    pub fn new(
        codec: Arc<dyn FeedCodec>,
        coordinator: Arc<GapRecoveryCoordinator>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        MessagePipeline {
            codec,
            coordinator,
            stats,
        }
    }

    pub fn codec(&self) -> &Arc<dyn FeedCodec> {
        &self.codec
    }

    pub fn coordinator(&self) -> &Arc<GapRecoveryCoordinator> {
        &self.coordinator
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    /// Handle one inbound frame
    pub async fn on_frame(&self, frame: Frame) -> FrameOutcome {
        self.stats.record_frame();

        let text = match frame {
            Frame::Text(text) => text,
            Frame::Close(reason) => {
                let reason = reason
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "no close frame".to_string());
                return FrameOutcome::SessionEnded(format!("remote closed: {}", reason));
            }
            Frame::Error(e) => return FrameOutcome::SessionEnded(format!("read error: {}", e)),
            Frame::Binary(_) | Frame::Other => {
                self.stats.record_ignored();
                return FrameOutcome::Ignored;
            }
        };

        let event = match self.codec.parse(&text) {
            Ok(event) => event,
            Err(e) => {
                self.stats.record_parse_error();
                tracing::warn!(
                    event = "parse_error",
                    error = %e,
                    frame_len = text.len(),
                    "Dropping unparseable frame"
                );
                return FrameOutcome::ParseFailed;
            }
        };

        match event {
            FeedEvent::Data(message) => match self.coordinator.admit(message).await {
                AdmitOutcome::Delivered => FrameOutcome::Delivered,
                AdmitOutcome::Held => FrameOutcome::Held,
                AdmitOutcome::Duplicate => FrameOutcome::Duplicate,
                AdmitOutcome::GapDetected(range) => FrameOutcome::GapDetected(range),
            },
            FeedEvent::SubscribeAck(keys) => FrameOutcome::SubscribeAck(keys),
            FeedEvent::ExchangeError { message, reason } => {
                let detail = match reason {
                    Some(reason) => format!("{}: {}", message, reason),
                    None => message,
                };
                self.stats.record_exchange_error();
                tracing::warn!(error = %detail, "Exchange reported an error");
                FrameOutcome::ExchangeError(detail)
            }
            FeedEvent::Ignored { kind } => {
                self.stats.record_ignored();
                tracing::trace!(kind = %kind, "Ignoring unsequenced event");
                FrameOutcome::Ignored
            }
        }
    }
}
