pub mod backoff;
pub mod config;
pub mod connection;
pub mod pipeline;
pub mod rate_limiter;
pub mod recovery;
pub mod sequencer;
pub mod stats;
pub mod subscription;
pub mod visitors;

pub use backoff::{DeadlineTimer, ReconnectBackoff};
pub use config::{BackoffConfig, ConnectionConfig, MIN_CONNECT_INTERVAL, RecoveryConfig};
pub use connection::{
    ConnectionState, FeedConnection, LifecycleError, ReconnectReason, SessionInfo,
};
pub use pipeline::{FrameOutcome, MessagePipeline, MessageVisitor, VisitorChain, VisitorError};
pub use rate_limiter::ConnectRateLimiter;
pub use recovery::{AdmitOutcome, GapRecoveryCoordinator};
pub use sequencer::{SequenceCheck, SequenceTracker, TrackerStatus};
pub use stats::{
    ConnectionStats, ConnectionStatsSnapshot, PipelineStats, PipelineStatsSnapshot,
};
pub use subscription::{
    DesiredState, ReconcileSignal, SubscriptionDelta, SubscriptionEntry, SubscriptionSet,
};
pub use visitors::{KeyMetrics, MetricsVisitor, PersistenceVisitor};
