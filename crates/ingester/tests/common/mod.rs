#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tickvault_core::{Channel, Frame, Message, ProductId, SequenceNumber, SessionId};
use tickvault_ingester::application::{
    BackoffConfig, ConnectionConfig, FeedConnection, GapRecoveryCoordinator, MessagePipeline,
    MessageVisitor, PipelineStats, RecoveryConfig, SubscriptionSet, VisitorChain, VisitorError,
};
use tickvault_ingester::infrastructure::JsonFeedCodec;
use tickvault_ports::{BackfillSource, FetchError, Session, Transport, TransportError};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::Registry;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

enum ConnectOutcome {
    Session(ScriptedSession),
    Fail(String),
}

/// What `connect` does once the script runs out
#[derive(Clone, Copy)]
pub enum WhenExhausted {
    Pend,
    Fail,
}

struct TransportState {
    script: Mutex<VecDeque<ConnectOutcome>>,
    connects: Mutex<Vec<Instant>>,
    exhausted: WhenExhausted,
}

/// Transport that replays a queue of connect outcomes
#[derive(Clone)]
pub struct ScriptedTransport {
    state: Arc<TransportState>,
}

impl ScriptedTransport {
    pub fn new(exhausted: WhenExhausted) -> Self {
        ScriptedTransport {
            state: Arc::new(TransportState {
                script: Mutex::new(VecDeque::new()),
                connects: Mutex::new(Vec::new()),
                exhausted,
            }),
        }
    }

    /// Queue a session and return the handle that feeds it
    pub fn push_session(&self) -> SessionHandle {
        let (session, handle) = scripted_session();
        self.state
            .script
            .lock()
            .push_back(ConnectOutcome::Session(session));
        handle
    }

    pub fn push_failure(&self, reason: &str) {
        self.state
            .script
            .lock()
            .push_back(ConnectOutcome::Fail(reason.to_string()));
    }

    pub fn connects(&self) -> Vec<Instant> {
        self.state.connects.lock().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.lock().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    type Session = ScriptedSession;

    async fn connect(&self) -> Result<ScriptedSession, TransportError> {
        self.state.connects.lock().push(Instant::now());
        let next = self.state.script.lock().pop_front();
        match (next, self.state.exhausted) {
            (Some(ConnectOutcome::Session(session)), _) => Ok(session),
            (Some(ConnectOutcome::Fail(reason)), _) => Err(TransportError::Connect(reason)),
            (None, WhenExhausted::Fail) => Err(TransportError::Connect("refused".into())),
            (None, WhenExhausted::Pend) => std::future::pending().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub struct ScriptedSession {
    id: SessionId,
    frames: mpsc::UnboundedReceiver<Frame>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
    fail_next_send: Arc<AtomicBool>,
}

/// Test-side end of a scripted session
#[derive(Clone)]
pub struct SessionHandle {
    frames: mpsc::UnboundedSender<Frame>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
    fail_next_send: Arc<AtomicBool>,
}

pub fn scripted_session() -> (ScriptedSession, SessionHandle) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sent = Arc::new(Mutex::new(Vec::new()));
    let closed = Arc::new(AtomicBool::new(false));
    let fail_next_send = Arc::new(AtomicBool::new(false));
    (
        ScriptedSession {
            id: SessionId::new(),
            frames: rx,
            sent: sent.clone(),
            closed: closed.clone(),
            fail_next_send: fail_next_send.clone(),
        },
        SessionHandle {
            frames: tx,
            sent,
            closed,
            fail_next_send,
        },
    )
}

impl SessionHandle {
    pub fn push_text(&self, text: impl Into<String>) {
        let _ = self.frames.send(Frame::Text(text.into()));
    }

    pub fn push_frame(&self, frame: Frame) {
        let _ = self.frames.send(frame);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Number of sent requests of the given type
    pub fn sent_count(&self, kind: &str) -> usize {
        let needle = format!("\"type\":\"{}\"", kind);
        self.sent.lock().iter().filter(|s| s.contains(&needle)).count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Make the next `send` fail without closing the session
    pub fn fail_next_send(&self) {
        self.fail_next_send.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Session for ScriptedSession {
    fn id(&self) -> SessionId {
        self.id
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if self.fail_next_send.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Send("write buffer full".into()));
        }
        self.sent.lock().push(text);
        Ok(())
    }

    async fn receive(&mut self) -> Frame {
        match self.frames.recv().await {
            Some(frame) => frame,
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Backfill and visitors
// ---------------------------------------------------------------------------

/// Serves every requested sequence, recording each call
#[derive(Default)]
pub struct ScriptedBackfill {
    calls: Mutex<Vec<(ProductId, Channel, SequenceNumber, SequenceNumber)>>,
}

impl ScriptedBackfill {
    pub fn calls(&self) -> Vec<(ProductId, Channel, SequenceNumber, SequenceNumber)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl BackfillSource for ScriptedBackfill {
    async fn fetch_range(
        &self,
        product: &ProductId,
        channel: Channel,
        from: SequenceNumber,
        to: SequenceNumber,
    ) -> Result<Vec<Message>, FetchError> {
        self.calls.lock().push((product.clone(), channel, from, to));
        Ok((from..=to)
            .map(|sequence| {
                Message::new(
                    product.clone(),
                    channel,
                    sequence,
                    "open",
                    json!({ "sequence": sequence, "source": "backfill" }),
                    Utc::now(),
                )
            })
            .collect())
    }
}

/// Records every delivered message
#[derive(Default)]
pub struct RecordingVisitor {
    delivered: Mutex<Vec<Message>>,
}

impl RecordingVisitor {
    pub fn sequences(&self) -> Vec<SequenceNumber> {
        self.delivered.lock().iter().map(|m| m.sequence()).collect()
    }

    pub fn len(&self) -> usize {
        self.delivered.lock().len()
    }
}

#[async_trait]
impl MessageVisitor for RecordingVisitor {
    fn name(&self) -> &str {
        "recording"
    }

    async fn visit(&self, message: &Message) -> Result<(), VisitorError> {
        self.delivered.lock().push(message.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub const PRODUCT: &str = "BTC-USD";

pub struct Harness {
    pub connection: FeedConnection<ScriptedTransport>,
    pub transport: ScriptedTransport,
    pub delivered: Arc<RecordingVisitor>,
    pub backfill: Arc<ScriptedBackfill>,
    pub stats: Arc<PipelineStats>,
    pub coordinator: Arc<GapRecoveryCoordinator>,
}

/// Backoff pinned to the connect floor so reconnect timing is deterministic
pub fn test_config() -> ConnectionConfig {
    let floor = Duration::from_millis(500);
    ConnectionConfig::new().with_backoff(BackoffConfig::fixed_curve(floor, floor, floor))
}

pub fn harness(transport: ScriptedTransport, config: ConnectionConfig) -> Harness {
    let stats = Arc::new(PipelineStats::new());
    let delivered = Arc::new(RecordingVisitor::default());
    let backfill = Arc::new(ScriptedBackfill::default());

    let chain = VisitorChain::new(Arc::clone(&stats)).with(delivered.clone());
    let coordinator = Arc::new(GapRecoveryCoordinator::new(
        Arc::new(chain),
        backfill.clone(),
        RecoveryConfig::default(),
        Arc::clone(&stats),
    ));
    let pipeline = Arc::new(MessagePipeline::new(
        Arc::new(JsonFeedCodec::new(vec![Channel::Full])),
        Arc::clone(&coordinator),
        Arc::clone(&stats),
    ));

    let subscriptions = SubscriptionSet::new(vec![Channel::Full]);
    subscriptions.add_product(PRODUCT);

    Harness {
        connection: FeedConnection::new(transport.clone(), config, subscriptions, pipeline),
        transport,
        delivered,
        backfill,
        stats,
        coordinator,
    }
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

pub fn ack(products: &[&str]) -> String {
    json!({
        "type": "subscriptions",
        "channels": [{ "name": "full", "product_ids": products }]
    })
    .to_string()
}

pub fn open(product: &str, sequence: SequenceNumber) -> String {
    json!({
        "type": "open",
        "product_id": product,
        "sequence": sequence,
        "price": "100.00"
    })
    .to_string()
}

pub fn heartbeat(product: &str, sequence: SequenceNumber) -> String {
    json!({
        "type": "heartbeat",
        "product_id": product,
        "sequence": sequence,
        "last_trade_id": sequence / 10
    })
    .to_string()
}

pub fn exchange_error(message: &str) -> String {
    json!({ "type": "error", "message": message }).to_string()
}

// ---------------------------------------------------------------------------
// Log capture
// ---------------------------------------------------------------------------

/// Collects the `event` field of every log record
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    /// Capture events on this thread until the guard drops
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        tracing::subscriber::set_default(Registry::default().with(self.clone()))
    }

    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.as_str() == name).count()
    }
}

#[derive(Default)]
struct EventField(Option<String>);

impl Visit for EventField {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "event" {
            self.0 = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "event" && self.0.is_none() {
            self.0 = Some(format!("{value:?}").trim_matches('"').to_string());
        }
    }
}

impl<S: Subscriber> Layer<S> for EventLog {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut field = EventField::default();
        event.record(&mut field);
        if let Some(name) = field.0 {
            self.events.lock().push(name);
        }
    }
}

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// Poll `condition` until it holds, failing after a minute of (virtual) time
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(60);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
