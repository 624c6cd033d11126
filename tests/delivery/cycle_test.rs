//! Tests for single poll cycles: send-retry, ack-retry, dedup, and health.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use kairo_bridge::backend::Backend;
use kairo_bridge::delivery::health::HealthTransition;
use kairo_bridge::delivery::retry::RetryPolicy;
use kairo_bridge::delivery::store::{ClearPolicy, DeliveryState};
use kairo_bridge::delivery::{DeliveryEngine, DeliveryOutcome, DeliverySettings};
use kairo_bridge::transport::Transport;

use crate::support::{outbound, MockBackend, MockTransport};

fn fast_settings() -> DeliverySettings {
    DeliverySettings {
        send_retry: RetryPolicy::immediate(3),
        ack_retry: RetryPolicy::immediate(3),
        send_timeout: Duration::from_millis(50),
        ..DeliverySettings::default()
    }
}

fn engine_with(
    backend: &Arc<MockBackend>,
    transport: &Arc<MockTransport>,
    settings: DeliverySettings,
) -> (DeliveryEngine, watch::Sender<bool>) {
    let (ready_tx, ready_rx) = watch::channel(true);
    let backend: Arc<dyn Backend> = backend.clone();
    let transport: Arc<dyn Transport> = transport.clone();
    (
        DeliveryEngine::new(backend, transport, ready_rx, settings),
        ready_tx,
    )
}

// ---------------------------------------------------------------------------
// Happy path and dedup
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delivered_message_is_acked_and_not_resent() {
    let backend = MockBackend::with_batch(vec![outbound("m1", "u1", "hi")]);
    let transport = MockTransport::new();
    let (mut engine, _ready) = engine_with(&backend, &transport, fast_settings());

    engine.run_cycle().await;

    assert_eq!(engine.store().state("m1"), Some(DeliveryState::Delivered));
    assert_eq!(transport.delivered(), vec![("u1".to_owned(), "hi".to_owned())]);
    assert_eq!(backend.acks(), 1);

    engine.run_cycle().await;
    engine.run_cycle().await;

    assert_eq!(transport.attempts(), 1, "delivered id must not be resent");
    assert_eq!(backend.acks(), 1);
    assert_eq!(backend.fetches(), 3);
}

#[tokio::test]
async fn batch_is_processed_in_order() {
    let backend = MockBackend::with_batch(vec![
        outbound("a", "u1", "first"),
        outbound("b", "u2", "second"),
        outbound("c", "u1", "third"),
    ]);
    let transport = MockTransport::new();
    let (mut engine, _ready) = engine_with(&backend, &transport, fast_settings());

    engine.run_cycle().await;

    let bodies: Vec<String> = transport.delivered().into_iter().map(|(_, b)| b).collect();
    assert_eq!(bodies, vec!["first", "second", "third"]);
    assert_eq!(
        *backend.acked.lock().expect("lock"),
        vec!["a".to_owned(), "b".to_owned(), "c".to_owned()]
    );
}

#[tokio::test]
async fn duplicate_id_within_batch_is_sent_once() {
    let backend = MockBackend::with_batch(vec![
        outbound("m1", "u1", "hi"),
        outbound("m1", "u1", "hi"),
    ]);
    let transport = MockTransport::new();
    let (mut engine, _ready) = engine_with(&backend, &transport, fast_settings());

    engine.run_cycle().await;

    assert_eq!(transport.attempts(), 1);
}

#[tokio::test]
async fn malformed_message_is_skipped() {
    let backend = MockBackend::default();
    let transport = MockTransport::new();
    let backend = Arc::new(backend);
    let (mut engine, _ready) = engine_with(&backend, &transport, fast_settings());

    let outcome = engine.deliver(&outbound("", "u1", "hi")).await;
    assert_eq!(outcome, DeliveryOutcome::Malformed);
    let outcome = engine.deliver(&outbound("m1", "u1", "")).await;
    assert_eq!(outcome, DeliveryOutcome::Malformed);

    assert_eq!(transport.attempts(), 0);
    assert!(engine.store().is_empty());
}

// ---------------------------------------------------------------------------
// Send retry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_succeeds_after_transient_failures() {
    let backend = MockBackend::with_batch(vec![outbound("m1", "u1", "hi")]);
    let transport = MockTransport::new();
    transport.fail_sends(2);
    let (mut engine, _ready) = engine_with(&backend, &transport, fast_settings());

    let outcome = engine.deliver(&outbound("m1", "u1", "hi")).await;

    assert_eq!(outcome, DeliveryOutcome::Delivered);
    assert_eq!(transport.attempts(), 3);
    assert_eq!(transport.delivered().len(), 1, "exactly one successful send");
    assert_eq!(backend.acks(), 1, "ack must follow the successful send");
}

#[tokio::test]
async fn exhausted_send_leaves_message_eligible() {
    let backend = MockBackend::with_batch(vec![outbound("m1", "u1", "hi")]);
    let transport = MockTransport::new();
    transport.fail_sends(3);
    let (mut engine, _ready) = engine_with(&backend, &transport, fast_settings());

    engine.run_cycle().await;

    assert_eq!(transport.attempts(), 3);
    assert!(!engine.store().contains("m1"));
    assert_eq!(backend.acks(), 0);

    // Next cycle retries from scratch and the transport has recovered.
    engine.run_cycle().await;

    assert_eq!(transport.attempts(), 4);
    assert_eq!(engine.store().state("m1"), Some(DeliveryState::Delivered));
}

#[tokio::test(start_paused = true)]
async fn send_timeout_consumes_one_attempt() {
    let backend = MockBackend::with_batch(vec![]);
    let transport = MockTransport::new();
    transport.hang_sends(1);
    let (mut engine, _ready) = engine_with(&backend, &transport, fast_settings());

    let outcome = engine.deliver(&outbound("m1", "u1", "hi")).await;

    assert_eq!(outcome, DeliveryOutcome::Delivered);
    assert_eq!(transport.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn send_retry_waits_between_attempts() {
    let backend = MockBackend::with_batch(vec![]);
    let transport = MockTransport::new();
    transport.fail_sends(2);
    let settings = DeliverySettings {
        send_retry: RetryPolicy::new(3, Duration::from_secs(2)),
        ack_retry: RetryPolicy::immediate(3),
        ..DeliverySettings::default()
    };
    let (mut engine, _ready) = engine_with(&backend, &transport, settings);

    let started = tokio::time::Instant::now();
    engine.deliver(&outbound("m1", "u1", "hi")).await;

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(4), "two pauses of 2s, got {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "no pause after the success, got {elapsed:?}");
}

// ---------------------------------------------------------------------------
// Ack retry and quarantine
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ack_recovers_within_budget() {
    let backend = MockBackend::with_batch(vec![]);
    backend.fail_acks(2);
    let transport = MockTransport::new();
    let (mut engine, _ready) = engine_with(&backend, &transport, fast_settings());

    let outcome = engine.deliver(&outbound("m1", "u1", "hi")).await;

    assert_eq!(outcome, DeliveryOutcome::Delivered);
    assert_eq!(backend.acks(), 3);
    assert_eq!(engine.store().state("m1"), Some(DeliveryState::Delivered));
}

#[tokio::test(start_paused = true)]
async fn ack_retry_waits_between_attempts() {
    let backend = MockBackend::with_batch(vec![]);
    backend.fail_acks(2);
    let transport = MockTransport::new();
    let settings = DeliverySettings {
        send_retry: RetryPolicy::immediate(3),
        ack_retry: RetryPolicy::new(3, Duration::from_secs(3)),
        ..DeliverySettings::default()
    };
    let (mut engine, _ready) = engine_with(&backend, &transport, settings);

    let started = tokio::time::Instant::now();
    let outcome = engine.deliver(&outbound("m1", "u1", "hi")).await;

    assert_eq!(outcome, DeliveryOutcome::Delivered);
    assert_eq!(backend.acks(), 3);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(6), "two pauses of 3s, got {elapsed:?}");
    assert!(elapsed < Duration::from_secs(7), "no pause after the success, got {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn exhausted_ack_does_not_pause_after_last_attempt() {
    let backend = MockBackend::with_batch(vec![]);
    backend.fail_acks(3);
    let transport = MockTransport::new();
    let settings = DeliverySettings {
        send_retry: RetryPolicy::immediate(3),
        ack_retry: RetryPolicy::new(3, Duration::from_secs(3)),
        ..DeliverySettings::default()
    };
    let (mut engine, _ready) = engine_with(&backend, &transport, settings);

    let started = tokio::time::Instant::now();
    let outcome = engine.deliver(&outbound("m1", "u1", "hi")).await;

    assert_eq!(outcome, DeliveryOutcome::Quarantined);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(6), "two pauses of 3s, got {elapsed:?}");
    assert!(elapsed < Duration::from_secs(7), "no pause after the final failure, got {elapsed:?}");
}

#[tokio::test]
async fn exhausted_ack_quarantines_until_clear() {
    let backend = MockBackend::with_batch(vec![outbound("m1", "u1", "hi")]);
    backend.fail_acks(3);
    let transport = MockTransport::new();
    let (mut engine, _ready) = engine_with(&backend, &transport, fast_settings());

    engine.run_cycle().await;

    assert_eq!(engine.store().state("m1"), Some(DeliveryState::Quarantined));
    assert_eq!(backend.acks(), 3);
    assert_eq!(transport.attempts(), 1);

    for _ in 0..5 {
        engine.run_cycle().await;
    }
    assert_eq!(transport.attempts(), 1, "quarantined id must not be resent");
    assert_eq!(backend.acks(), 3, "quarantined id must not be re-acked");

    assert_eq!(engine.clear_quarantine(), 1);
    assert!(!engine.store().contains("m1"));

    engine.run_cycle().await;
    assert_eq!(transport.attempts(), 2, "released id is delivered again");
    assert_eq!(engine.store().state("m1"), Some(DeliveryState::Delivered));
}

#[tokio::test]
async fn default_clear_keeps_delivered_ids() {
    let backend = MockBackend::with_batch(vec![outbound("m1", "u1", "hi")]);
    let transport = MockTransport::new();
    let (mut engine, _ready) = engine_with(&backend, &transport, fast_settings());

    engine.run_cycle().await;
    assert_eq!(engine.clear_quarantine(), 0);
    engine.run_cycle().await;

    assert_eq!(transport.attempts(), 1);
}

#[tokio::test]
async fn clear_all_policy_releases_delivered_ids() {
    let backend = MockBackend::with_batch(vec![outbound("m1", "u1", "hi")]);
    let transport = MockTransport::new();
    let settings = DeliverySettings {
        clear_policy: ClearPolicy::All,
        ..fast_settings()
    };
    let (mut engine, _ready) = engine_with(&backend, &transport, settings);

    engine.run_cycle().await;
    assert_eq!(engine.clear_quarantine(), 1);
    engine.run_cycle().await;

    assert_eq!(transport.attempts(), 2);
}

// ---------------------------------------------------------------------------
// Session gate and health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn not_ready_session_defers_without_fetching() {
    let backend = MockBackend::with_batch(vec![outbound("m1", "u1", "hi")]);
    let transport = MockTransport::new();
    let (mut engine, ready) = engine_with(&backend, &transport, fast_settings());
    ready.send_replace(false);

    let delay = engine.run_cycle().await;

    assert_eq!(delay, DeliverySettings::default().not_ready_delay);
    assert_eq!(backend.fetches(), 0);

    ready.send_replace(true);
    engine.run_cycle().await;
    assert_eq!(backend.fetches(), 1);
    assert_eq!(transport.attempts(), 1);
}

#[tokio::test]
async fn unreachable_backend_slows_polling() {
    let backend = MockBackend::with_batch(vec![]);
    backend.set_fetch_down(true);
    let transport = MockTransport::new();
    let settings = fast_settings();
    let (fast, slow) = (settings.fast_interval, settings.slow_interval);
    let (mut engine, _ready) = engine_with(&backend, &transport, settings);

    assert_eq!(engine.run_cycle().await, slow);
    assert!(!engine.health().is_connected());
    assert_eq!(engine.run_cycle().await, slow);

    backend.set_fetch_down(false);
    assert_eq!(engine.run_cycle().await, fast);
    assert!(engine.health().is_connected());
}

#[tokio::test]
async fn backend_outage_reports_one_loss_and_one_restore() {
    let backend = MockBackend::with_batch(vec![]);
    let transport = MockTransport::new();
    let (mut engine, _ready) = engine_with(&backend, &transport, fast_settings());

    backend.set_fetch_down(true);
    engine.run_cycle().await;
    assert_eq!(engine.last_transition(), HealthTransition::Lost);
    engine.run_cycle().await;
    assert_eq!(engine.last_transition(), HealthTransition::Unchanged);

    backend.set_fetch_down(false);
    engine.run_cycle().await;
    assert_eq!(engine.last_transition(), HealthTransition::Restored);
    engine.run_cycle().await;
    assert_eq!(engine.last_transition(), HealthTransition::Unchanged);
}

#[tokio::test]
async fn snapshot_reflects_store_and_health() {
    let backend = MockBackend::with_batch(vec![
        outbound("ok", "u1", "hi"),
        outbound("stuck", "u2", "hello"),
    ]);
    let transport = MockTransport::new();
    let (mut engine, _ready) = engine_with(&backend, &transport, fast_settings());
    let snapshots = engine.subscribe();

    // First message acks fine; the second one exhausts the ack budget.
    engine.deliver(&outbound("ok", "u1", "hi")).await;
    backend.fail_acks(3);
    engine.run_cycle().await;

    let snapshot = snapshots.borrow().clone();
    assert!(snapshot.backend_connected);
    assert_eq!(snapshot.delivered, 1);
    assert_eq!(snapshot.quarantined, 1);
    assert!(snapshot.last_cycle.is_some());
}
