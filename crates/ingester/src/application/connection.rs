//! Connection state machine
//!
//! ```text
//!          start()
//!   Idle ──────────► Connecting ──(handshake ok)──► AwaitingSubscribeAck
//!                       ▲   │                           │        │
//!                       │   └──(handshake error)──┐     │ ack    │ reject / 5s
//!                       │                         ▼     ▼        ▼
//!                       └──(delay)────── Reconnecting ◄── Streaming
//!                                                  close / read error
//!
//!   any state ──stop()──► Closing ──► Closed
//! ```
//!
//! One driver task owns the live session. Every transport-level failure
//! discards the session and goes through `Reconnecting`; the rate limiter
//! spaces every connect attempt by at least 500ms.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tickvault_core::SessionId;
use tickvault_ports::{CodecError, FeedRequest, Session, Transport, TransportError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;

use super::backoff::{DeadlineTimer, ReconnectBackoff};
use super::config::ConnectionConfig;
use super::pipeline::{FrameOutcome, MessagePipeline};
use super::rate_limiter::ConnectRateLimiter;
use super::stats::{ConnectionStats, ConnectionStatsSnapshot};
use super::subscription::{SubscriptionDelta, SubscriptionSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    AwaitingSubscribeAck,
    Streaming,
    Reconnecting { delay: Duration },
    Closing,
    Closed,
}

impl ConnectionState {
    fn is_shutting_down(&self) -> bool {
        matches!(self, ConnectionState::Closing | ConnectionState::Closed)
    }
}

/// Why a session was discarded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectReason {
    ConnectFailed(String),
    SubscribeFailed(String),
    SubscribeRejected(String),
    SubscribeTimeout(Duration),
    SessionEnded(String),
}

impl fmt::Display for ReconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconnectReason::ConnectFailed(e) => write!(f, "connect failed: {}", e),
            ReconnectReason::SubscribeFailed(e) => write!(f, "subscribe failed: {}", e),
            ReconnectReason::SubscribeRejected(e) => write!(f, "subscribe rejected: {}", e),
            ReconnectReason::SubscribeTimeout(after) => {
                write!(f, "no subscribe ack within {}ms", after.as_millis())
            }
            ReconnectReason::SessionEnded(e) => write!(f, "{}", e),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Connection already started")]
    AlreadyStarted,
    #[error("Connection was stopped")]
    Stopped,
}

enum AckOutcome {
    Acked,
    Discard(ReconnectReason),
    Stopped,
}

#[derive(Error, Debug)]
enum RequestError {
    #[error(transparent)]
    Encode(#[from] CodecError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Identity and activity of the live session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Stopped,
}

struct Lifecycle {
    phase: Phase,
    cancel: CancellationToken,
    driver: Option<JoinHandle<()>>,
    watchdog: Option<JoinHandle<()>>,
}

struct Inner<T: Transport> {
    transport: T,
    config: ConnectionConfig,
    subscriptions: SubscriptionSet,
    pipeline: Arc<MessagePipeline>,
    state: watch::Sender<ConnectionState>,
    /// Cancelled the first time a session reaches `Streaming`. Stays set
    /// even if that session ends before anyone observes the state.
    streamed: CancellationToken,
    session: Mutex<Option<SessionInfo>>,
    stats: ConnectionStats,
}

/// Owns the feed connection lifecycle
pub struct FeedConnection<T: Transport> {
    inner: Arc<Inner<T>>,
    lifecycle: Mutex<Lifecycle>,
}

impl<T: Transport> FeedConnection<T> {
    pub fn new(
        transport: T,
        config: ConnectionConfig,
        subscriptions: SubscriptionSet,
        pipeline: Arc<MessagePipeline>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        FeedConnection {
            inner: Arc::new(Inner {
                transport,
                config,
                subscriptions,
                pipeline,
                state,
                streamed: CancellationToken::new(),
                session: Mutex::new(None),
                stats: ConnectionStats::new(),
            }),
            lifecycle: Mutex::new(Lifecycle {
                phase: Phase::Idle,
                cancel: CancellationToken::new(),
                driver: None,
                watchdog: None,
            }),
        }
    }

    /// Spawn the driver task. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), LifecycleError> {
        let mut lifecycle = self.lifecycle.lock();
        match lifecycle.phase {
            Phase::Running => return Err(LifecycleError::AlreadyStarted),
            Phase::Stopped => return Err(LifecycleError::Stopped),
            Phase::Idle => {}
        }
        lifecycle.phase = Phase::Running;

        self.inner.pipeline.coordinator().resume_pending();

        let cancel = lifecycle.cancel.clone();
        lifecycle.watchdog = Some(spawn_initial_connect_watchdog(
            Arc::clone(&self.inner),
            cancel.clone(),
        ));
        let inner = Arc::clone(&self.inner);
        lifecycle.driver = Some(tokio::spawn(async move { inner.run(cancel).await }));

        tracing::info!(
            desired = self.inner.subscriptions.desired().len(),
            "Feed connection started"
        );
        Ok(())
    }

    /// Tear the connection down permanently.
    ///
    /// Waits for the driver, stops gap recovery and flushes the visitors.
    pub async fn stop(&self) {
        let (driver, watchdog) = {
            let mut lifecycle = self.lifecycle.lock();
            match lifecycle.phase {
                Phase::Stopped => return,
                Phase::Idle => {
                    lifecycle.phase = Phase::Stopped;
                    self.inner.set_state(ConnectionState::Closed);
                    return;
                }
                Phase::Running => {}
            }
            lifecycle.phase = Phase::Stopped;
            lifecycle.cancel.cancel();
            (lifecycle.driver.take(), lifecycle.watchdog.take())
        };

        self.inner.set_state(ConnectionState::Closing);
        for task in [driver, watchdog].into_iter().flatten() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Connection task panicked");
            }
        }

        let coordinator = self.inner.pipeline.coordinator();
        coordinator.shutdown().await;
        coordinator.chain().flush().await;

        self.inner.set_state(ConnectionState::Closed);
        let stats = self.inner.stats.snapshot();
        tracing::info!(
            sessions = stats.sessions,
            reconnects = stats.reconnects,
            "Feed connection stopped"
        );
    }

    /// Resolve once the connection has been stopped
    pub async fn wait(&self) {
        if self.lifecycle.lock().phase == Phase::Idle {
            return;
        }
        let mut state = self.inner.state.subscribe();
        let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
    }

    /// Ask the driver to reconcile subscriptions; repeated calls coalesce
    pub fn request_resubscribe(&self) {
        self.inner.subscriptions.signal().request();
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn current_session(&self) -> Option<SessionInfo> {
        self.inner.session.lock().clone()
    }

    pub fn subscriptions(&self) -> &SubscriptionSet {
        &self.inner.subscriptions
    }

    pub fn stats(&self) -> ConnectionStatsSnapshot {
        self.inner.stats.snapshot()
    }
}

fn spawn_initial_connect_watchdog<T: Transport>(
    inner: Arc<Inner<T>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut timer = DeadlineTimer::new(inner.config.initial_connect_deadline);
    timer.arm();

    tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {}
            _ = inner.streamed.cancelled() => {}
            _ = timer.expired() => {
                inner.stats.record_slow_initial_connect();
                tracing::warn!(
                    event = "slow_initial_connect",
                    deadline_ms = timer.deadline().as_millis() as u64,
                    state = ?*inner.state.borrow(),
                    "No streaming session since start, still retrying"
                );
            }
        }
    })
}

impl<T: Transport> Inner<T> {
    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            // Nothing but Closed may follow a shutdown
            if current.is_shutting_down() && next != ConnectionState::Closed {
                return false;
            }
            tracing::debug!(from = ?*current, to = ?next, "Connection state");
            *current = next;
            true
        });
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut limiter = ConnectRateLimiter::new(self.config.min_connect_interval);
        let mut backoff = ReconnectBackoff::new(self.config.backoff.clone());

        loop {
            self.set_state(ConnectionState::Connecting);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = limiter.acquire() => {}
            }

            self.stats.record_connect_attempt();
            let connected = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.transport.connect() => result,
            };

            let reason = match connected {
                Err(e) => ReconnectReason::ConnectFailed(e.to_string()),
                Ok(mut session) => {
                    let reason = self.run_session(&mut session, &mut backoff, &cancel).await;
                    session.close().await;
                    self.session.lock().take();
                    self.subscriptions.reset_applied();
                    match reason {
                        Some(reason) => reason,
                        None => break,
                    }
                }
            };

            let delay = backoff.next_delay();
            self.stats.record_reconnect();
            tracing::warn!(
                event = "reconnect",
                reason = %reason,
                attempt = backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "Session discarded, reconnecting"
            );
            self.set_state(ConnectionState::Reconnecting { delay });

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }

        tracing::debug!("Connection driver exited");
    }

    /// Drive one session until it fails (Some) or the connection stops (None)
    async fn run_session(
        &self,
        session: &mut T::Session,
        backoff: &mut ReconnectBackoff,
        cancel: &CancellationToken,
    ) -> Option<ReconnectReason> {
        let id = session.id();
        let now = Utc::now();
        *self.session.lock() = Some(SessionInfo {
            id,
            created_at: now,
            last_activity: now,
        });
        self.stats.record_session();
        tracing::info!(session = %id, "Transport session established");

        self.set_state(ConnectionState::AwaitingSubscribeAck);
        let keys = self.subscriptions.full_subscribe();
        self.pipeline.coordinator().rebaseline(&keys);
        if keys.is_empty() {
            tracing::info!(session = %id, "Desired set empty, streaming without subscribe");
        } else {
            let count = keys.len();
            if let Err(e) = self.send_request(session, FeedRequest::Subscribe(keys)).await {
                return Some(ReconnectReason::SubscribeFailed(e.to_string()));
            }
            match self.await_ack(session, cancel).await {
                AckOutcome::Acked => {}
                AckOutcome::Discard(reason) => return Some(reason),
                AckOutcome::Stopped => return None,
            }
            tracing::info!(session = %id, subscriptions = count, "Subscribe acknowledged");
        }

        self.streamed.cancel();
        self.set_state(ConnectionState::Streaming);
        backoff.reset();
        self.stream(session, cancel).await
    }

    async fn await_ack(&self, session: &mut T::Session, cancel: &CancellationToken) -> AckOutcome {
        let mut deadline = DeadlineTimer::new(self.config.subscribe_ack_timeout);
        deadline.arm();

        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => return AckOutcome::Stopped,
                _ = deadline.expired() => {
                    self.stats.record_subscribe_timeout();
                    return AckOutcome::Discard(ReconnectReason::SubscribeTimeout(deadline.deadline()));
                }
                frame = session.receive() => frame,
            };
            self.touch();

            // Data frames ahead of the ack still go through the pipeline
            match self.pipeline.on_frame(frame).await {
                FrameOutcome::SubscribeAck(_) => return AckOutcome::Acked,
                FrameOutcome::ExchangeError(detail) => {
                    return AckOutcome::Discard(ReconnectReason::SubscribeRejected(detail));
                }
                FrameOutcome::SessionEnded(reason) => {
                    return AckOutcome::Discard(ReconnectReason::SessionEnded(reason));
                }
                _ => {}
            }
        }
    }

    async fn stream(
        &self,
        session: &mut T::Session,
        cancel: &CancellationToken,
    ) -> Option<ReconnectReason> {
        let signal = self.subscriptions.signal();
        let mut reconcile_at: Option<Instant> = None;
        if !self.subscriptions.is_reconciled() {
            reconcile_at = Some(Instant::now() + self.config.reconcile_debounce);
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = signal.requested(), if reconcile_at.is_none() => {
                    reconcile_at = Some(Instant::now() + self.config.reconcile_debounce);
                }
                _ = sleep_until(reconcile_at.unwrap_or_else(Instant::now)), if reconcile_at.is_some() => {
                    reconcile_at = None;
                    self.reconcile(session).await;
                }
                frame = session.receive() => {
                    self.touch();
                    match self.pipeline.on_frame(frame).await {
                        FrameOutcome::SessionEnded(reason) => {
                            return Some(ReconnectReason::SessionEnded(reason));
                        }
                        FrameOutcome::SubscribeAck(keys) => {
                            tracing::debug!(subscriptions = keys.len(), "Subscription update acknowledged");
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Send the pending subscription delta. Failures are logged and the
    /// affected keys wait for the next reconciliation.
    async fn reconcile(&self, session: &mut T::Session) {
        let delta = self.subscriptions.take_delta();
        if delta.is_empty() {
            return;
        }

        let mut failed = SubscriptionDelta::default();
        if !delta.subscribe.is_empty() {
            self.pipeline.coordinator().rebaseline(&delta.subscribe);
            let request = FeedRequest::Subscribe(delta.subscribe.clone());
            if let Err(e) = self.send_request(session, request).await {
                tracing::warn!(error = %e, keys = delta.subscribe.len(), "Subscribe update failed");
                failed.subscribe = delta.subscribe.clone();
            }
        }
        if !delta.unsubscribe.is_empty() {
            let request = FeedRequest::Unsubscribe(delta.unsubscribe.clone());
            match self.send_request(session, request).await {
                Ok(()) => self.pipeline.coordinator().retire(&delta.unsubscribe),
                Err(e) => {
                    tracing::warn!(error = %e, keys = delta.unsubscribe.len(), "Unsubscribe update failed");
                    failed.unsubscribe = delta.unsubscribe.clone();
                }
            }
        }

        if !failed.is_empty() {
            self.subscriptions.restore(&failed);
        }
    }

    async fn send_request(
        &self,
        session: &mut T::Session,
        request: FeedRequest,
    ) -> Result<(), RequestError> {
        let text = self.pipeline.codec().encode(&request)?;
        session.send(text).await?;
        tracing::debug!(
            request = request.label(),
            keys = ?request.keys().iter().map(|k| k.to_string()).collect::<Vec<_>>(),
            "Subscription request sent"
        );
        Ok(())
    }

    fn touch(&self) {
        if let Some(info) = self.session.lock().as_mut() {
            info.last_activity = Utc::now();
        }
    }
}
