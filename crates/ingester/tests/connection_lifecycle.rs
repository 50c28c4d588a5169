mod common;

use common::*;
use std::time::Duration;
use tickvault_core::{Channel, Frame, SubscriptionKey};
use tickvault_ingester::application::{BackoffConfig, ConnectionState, LifecycleError};
use tokio::time::sleep;

async fn wait_streaming(h: &Harness) {
    wait_until(|| h.connection.state() == ConnectionState::Streaming).await;
}

#[tokio::test(start_paused = true)]
async fn test_connect_attempts_never_closer_than_500ms() {
    let transport = ScriptedTransport::new(WhenExhausted::Fail);
    let config = test_config()
        .with_min_connect_interval(Duration::from_millis(10))
        .with_backoff(BackoffConfig::fixed_curve(
            Duration::ZERO,
            Duration::ZERO,
            Duration::ZERO,
        ));
    let h = harness(transport, config);

    h.connection.start().unwrap();
    wait_until(|| h.transport.connect_count() >= 5).await;
    h.connection.stop().await;

    let connects = h.transport.connects();
    for pair in connects.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(500));
    }
}

#[tokio::test(start_paused = true)]
async fn test_slow_initial_connect_warns_exactly_once() {
    let log = EventLog::default();
    let _guard = log.install();

    let h = harness(ScriptedTransport::new(WhenExhausted::Fail), test_config());
    h.connection.start().unwrap();
    sleep(Duration::from_secs(45)).await;
    h.connection.stop().await;

    assert_eq!(log.count("slow_initial_connect"), 1);
    assert_eq!(h.connection.stats().slow_initial_connect_warnings, 1);
    assert!(log.count("reconnect") > 10);
}

#[tokio::test(start_paused = true)]
async fn test_no_slow_connect_warning_when_streaming_in_time() {
    let log = EventLog::default();
    let _guard = log.install();

    let transport = ScriptedTransport::new(WhenExhausted::Pend);
    let session = transport.push_session();
    session.push_text(ack(&[PRODUCT]));
    let h = harness(transport, test_config());

    h.connection.start().unwrap();
    wait_streaming(&h).await;
    sleep(Duration::from_secs(30)).await;

    assert_eq!(log.count("slow_initial_connect"), 0);
    assert_eq!(h.connection.state(), ConnectionState::Streaming);
    h.connection.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_no_slow_connect_warning_after_short_lived_stream() {
    let log = EventLog::default();
    let _guard = log.install();

    // Streams for an instant, then every later connect hangs
    let transport = ScriptedTransport::new(WhenExhausted::Pend);
    let session = transport.push_session();
    session.push_text(ack(&[PRODUCT]));
    session.push_frame(Frame::Close(None));
    let h = harness(transport, test_config());

    h.connection.start().unwrap();
    sleep(Duration::from_secs(20)).await;

    assert_eq!(h.transport.connect_count(), 2);
    assert_ne!(h.connection.state(), ConnectionState::Streaming);
    assert_eq!(log.count("slow_initial_connect"), 0);
    assert_eq!(h.connection.stats().slow_initial_connect_warnings, 0);
    h.connection.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_missing_subscribe_ack_discards_session() {
    let log = EventLog::default();
    let _guard = log.install();

    let transport = ScriptedTransport::new(WhenExhausted::Pend);
    let silent = transport.push_session();
    let healthy = transport.push_session();
    healthy.push_text(ack(&[PRODUCT]));
    let h = harness(transport, test_config());

    h.connection.start().unwrap();
    wait_streaming(&h).await;

    let connects = h.transport.connects();
    assert_eq!(connects.len(), 2);
    assert!(connects[1] - connects[0] >= Duration::from_secs(5));
    assert!(silent.is_closed());
    assert_eq!(silent.sent_count("subscribe"), 1);
    assert_eq!(healthy.sent_count("subscribe"), 1);

    let stats = h.connection.stats();
    assert_eq!(stats.subscribe_timeouts, 1);
    assert_eq!(stats.reconnects, 1);
    assert_eq!(stats.sessions, 2);
    assert_eq!(log.count("reconnect"), 1);

    h.connection.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_rejected_subscribe_reconnects() {
    let transport = ScriptedTransport::new(WhenExhausted::Pend);
    let rejected = transport.push_session();
    rejected.push_text(exchange_error("Failed to subscribe"));
    let accepted = transport.push_session();
    accepted.push_text(ack(&[PRODUCT]));
    let h = harness(transport, test_config());

    h.connection.start().unwrap();
    wait_streaming(&h).await;

    assert!(rejected.is_closed());
    assert_eq!(h.transport.connect_count(), 2);
    assert_eq!(h.stats.snapshot().exchange_errors, 1);
    assert_eq!(h.connection.stats().subscribe_timeouts, 0);
    h.connection.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_sequence_state_survives_reconnect() {
    let transport = ScriptedTransport::new(WhenExhausted::Pend);
    let first = transport.push_session();
    first.push_text(ack(&[PRODUCT]));
    first.push_text(open(PRODUCT, 1));
    first.push_text(open(PRODUCT, 2));
    first.push_frame(Frame::Close(None));
    let second = transport.push_session();
    second.push_text(ack(&[PRODUCT]));
    second.push_text(open(PRODUCT, 2));
    second.push_text(open(PRODUCT, 3));
    let h = harness(transport, test_config());

    h.connection.start().unwrap();
    wait_until(|| h.delivered.len() == 3).await;
    sleep(Duration::from_millis(200)).await;

    assert_eq!(h.delivered.sequences(), vec![1, 2, 3]);
    assert_eq!(h.stats.snapshot().duplicates, 1);
    assert!(h.backfill.calls().is_empty());
    assert!(first.is_closed());
    assert_eq!(second.sent_count("subscribe"), 1);
    h.connection.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_parse_errors_do_not_disturb_the_session() {
    let log = EventLog::default();
    let _guard = log.install();

    let transport = ScriptedTransport::new(WhenExhausted::Pend);
    let session = transport.push_session();
    session.push_text(ack(&[PRODUCT]));
    session.push_text(open(PRODUCT, 1));
    session.push_text("not json");
    session.push_text(r#"{"type":"open","sequence":2}"#);
    session.push_text(open(PRODUCT, 2));
    let h = harness(transport, test_config());

    h.connection.start().unwrap();
    wait_until(|| h.delivered.len() == 2).await;

    assert_eq!(h.delivered.sequences(), vec![1, 2]);
    assert_eq!(h.stats.snapshot().parse_errors, 2);
    assert_eq!(log.count("parse_error"), 2);
    assert_eq!(h.transport.connect_count(), 1);
    assert_eq!(h.connection.state(), ConnectionState::Streaming);
    h.connection.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_sent_once() {
    let transport = ScriptedTransport::new(WhenExhausted::Pend);
    let session = transport.push_session();
    session.push_text(ack(&[PRODUCT]));
    session.push_text(open(PRODUCT, 1));
    let h = harness(transport, test_config());
    let key = SubscriptionKey::new(PRODUCT, Channel::Full);

    h.connection.start().unwrap();
    wait_until(|| h.delivered.len() == 1).await;
    assert!(h.coordinator.status(&key).is_some());

    let subscriptions = h.connection.subscriptions();
    assert!(subscriptions.remove_product(PRODUCT));
    assert!(!subscriptions.remove_product(PRODUCT));
    wait_until(|| session.sent_count("unsubscribe") == 1).await;

    h.connection.request_resubscribe();
    sleep(Duration::from_secs(1)).await;

    assert_eq!(session.sent_count("unsubscribe"), 1);
    assert!(subscriptions.applied().is_empty());
    assert!(h.coordinator.status(&key).is_some_and(|s| s.retired));
    h.connection.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_readded_product_starts_new_baseline() {
    let log = EventLog::default();
    let _guard = log.install();

    let transport = ScriptedTransport::new(WhenExhausted::Pend);
    let session = transport.push_session();
    session.push_text(ack(&[PRODUCT]));
    for sequence in 1..=3 {
        session.push_text(open(PRODUCT, sequence));
    }
    let h = harness(transport, test_config());

    h.connection.start().unwrap();
    wait_until(|| h.delivered.len() == 3).await;

    let subscriptions = h.connection.subscriptions();
    subscriptions.remove_product(PRODUCT);
    wait_until(|| session.sent_count("unsubscribe") == 1).await;

    // Already on the wire when the unsubscribe went out
    session.push_text(open(PRODUCT, 4));
    wait_until(|| h.delivered.len() == 4).await;

    subscriptions.add_product(PRODUCT);
    wait_until(|| session.sent_count("subscribe") == 2).await;
    session.push_text(ack(&[PRODUCT]));
    session.push_text(open(PRODUCT, 1_000_000));
    session.push_text(open(PRODUCT, 1_000_001));
    wait_until(|| h.delivered.len() == 6).await;
    sleep(Duration::from_millis(200)).await;

    assert_eq!(
        h.delivered.sequences(),
        vec![1, 2, 3, 4, 1_000_000, 1_000_001]
    );
    assert!(h.backfill.calls().is_empty());
    assert_eq!(log.count("gap_detected"), 0);
    assert_eq!(h.stats.snapshot().gaps_detected, 0);
    h.connection.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_added_product_subscribed_while_streaming() {
    let transport = ScriptedTransport::new(WhenExhausted::Pend);
    let session = transport.push_session();
    session.push_text(ack(&[PRODUCT]));
    let h = harness(transport, test_config());

    h.connection.start().unwrap();
    wait_streaming(&h).await;

    assert!(h.connection.subscriptions().add_product("ETH-USD"));
    wait_until(|| session.sent_count("subscribe") == 2).await;

    let update = session.sent().pop().unwrap();
    assert!(update.contains("ETH-USD"));
    assert!(!update.contains(PRODUCT));
    assert!(h.connection.subscriptions().is_reconciled());
    h.connection.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_update_send_keeps_session() {
    let transport = ScriptedTransport::new(WhenExhausted::Pend);
    let session = transport.push_session();
    session.push_text(ack(&[PRODUCT]));
    let h = harness(transport, test_config());

    h.connection.start().unwrap();
    wait_streaming(&h).await;

    session.fail_next_send();
    assert!(h.connection.subscriptions().add_product("ETH-USD"));
    sleep(Duration::from_secs(1)).await;

    assert_eq!(session.sent_count("subscribe"), 1);
    assert!(!h.connection.subscriptions().is_reconciled());
    assert_eq!(h.transport.connect_count(), 1);
    assert_eq!(h.connection.state(), ConnectionState::Streaming);
    assert_eq!(h.connection.stats().reconnects, 0);

    h.connection.request_resubscribe();
    wait_until(|| session.sent_count("subscribe") == 2).await;

    let update = session.sent().pop().unwrap();
    assert!(update.contains("ETH-USD"));
    assert!(h.connection.subscriptions().is_reconciled());
    assert!(!session.is_closed());
    h.connection.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_handshake_failure_reconnects() {
    let log = EventLog::default();
    let _guard = log.install();

    let transport = ScriptedTransport::new(WhenExhausted::Pend);
    transport.push_failure("tls handshake failed");
    let session = transport.push_session();
    session.push_text(ack(&[PRODUCT]));
    let h = harness(transport, test_config());

    h.connection.start().unwrap();
    wait_streaming(&h).await;

    let connects = h.transport.connects();
    assert_eq!(connects.len(), 2);
    assert!(connects[1] - connects[0] >= Duration::from_millis(500));
    assert_eq!(session.sent_count("subscribe"), 1);

    let stats = h.connection.stats();
    assert_eq!(stats.reconnects, 1);
    assert_eq!(stats.sessions, 1);
    assert_eq!(log.count("reconnect"), 1);
    h.connection.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_empty_desired_set_streams_without_subscribe() {
    let transport = ScriptedTransport::new(WhenExhausted::Pend);
    let session = transport.push_session();
    let h = harness(transport, test_config());
    h.connection.subscriptions().remove_product(PRODUCT);

    h.connection.start().unwrap();
    wait_streaming(&h).await;

    assert!(session.sent().is_empty());
    h.connection.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_start_twice_and_after_stop() {
    let transport = ScriptedTransport::new(WhenExhausted::Pend);
    let session = transport.push_session();
    session.push_text(ack(&[PRODUCT]));
    let h = harness(transport, test_config());

    h.connection.start().unwrap();
    assert_eq!(h.connection.start(), Err(LifecycleError::AlreadyStarted));
    wait_streaming(&h).await;
    assert!(h.connection.current_session().is_some());

    h.connection.stop().await;
    assert_eq!(h.connection.state(), ConnectionState::Closed);
    assert!(session.is_closed());
    assert!(h.connection.current_session().is_none());
    assert_eq!(h.connection.start(), Err(LifecycleError::Stopped));

    // Stopping again is a no-op
    h.connection.stop().await;
    assert_eq!(h.connection.state(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_wait_resolves_on_stop() {
    let transport = ScriptedTransport::new(WhenExhausted::Pend);
    let h = harness(transport, test_config());
    let mut states = h.connection.watch_state();

    h.connection.start().unwrap();
    tokio::join!(h.connection.wait(), async {
        sleep(Duration::from_secs(2)).await;
        assert_eq!(h.connection.state(), ConnectionState::Connecting);
        h.connection.stop().await;
    });

    assert_eq!(h.connection.state(), ConnectionState::Closed);
    assert_eq!(*states.borrow_and_update(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_wait_before_start_returns_immediately() {
    let h = harness(ScriptedTransport::new(WhenExhausted::Pend), test_config());
    h.connection.wait().await;
    assert_eq!(h.connection.state(), ConnectionState::Idle);
}
