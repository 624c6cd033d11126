//! Lifecycle controller: readiness gating, shutdown triggers, release.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use kairo_bridge::backend::Backend;
use kairo_bridge::lifecycle::{Lifecycle, ShutdownCause};
use kairo_bridge::relay::IncomingRelay;
use kairo_bridge::transport::{InboundMessage, TransportEvent};

use crate::support::{MockBackend, MockTransport};

fn relay_for(backend: &Arc<MockBackend>) -> IncomingRelay {
    let backend: Arc<dyn Backend> = backend.clone();
    IncomingRelay::new(backend)
}

// ---------------------------------------------------------------------------
// Shutdown causes
// ---------------------------------------------------------------------------

#[test]
fn requested_stops_exit_cleanly() {
    assert_eq!(ShutdownCause::Signal.exit_code(), 0);
    assert_eq!(ShutdownCause::ScheduledRestart.exit_code(), 0);
}

#[test]
fn faults_exit_with_failure() {
    assert_eq!(ShutdownCause::AuthFailure("bad".to_owned()).exit_code(), 1);
    assert_eq!(ShutdownCause::Disconnected("LOGOUT".to_owned()).exit_code(), 1);
    assert_eq!(ShutdownCause::EventStreamClosed.exit_code(), 1);
    assert_eq!(ShutdownCause::EngineStopped("panicked".to_owned()).exit_code(), 1);
}

#[test]
fn first_shutdown_trigger_wins() {
    let lifecycle = Lifecycle::new();
    let signal = lifecycle.shutdown_signal();
    assert!(!*signal.borrow());

    assert!(lifecycle.begin_shutdown(&ShutdownCause::Signal));
    assert!(!lifecycle.begin_shutdown(&ShutdownCause::EventStreamClosed));

    assert!(lifecycle.is_shutting_down());
    assert!(*signal.borrow());
}

// ---------------------------------------------------------------------------
// Event handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ready_event_enables_polling() {
    let lifecycle = Lifecycle::new();
    let relay = relay_for(&Arc::new(MockBackend::default()));
    let ready = lifecycle.session_ready();
    assert!(!lifecycle.is_ready());

    assert_eq!(lifecycle.handle_event(TransportEvent::Ready, &relay), None);

    assert!(lifecycle.is_ready());
    assert!(*ready.borrow());
}

#[tokio::test]
async fn non_fatal_events_keep_running() {
    let lifecycle = Lifecycle::new();
    let relay = relay_for(&Arc::new(MockBackend::default()));

    let pairing = TransportEvent::Pairing {
        code: "2@abc".to_owned(),
    };
    let error = TransportEvent::Error {
        message: "evaluation failed".to_owned(),
    };
    assert_eq!(lifecycle.handle_event(pairing, &relay), None);
    assert_eq!(lifecycle.handle_event(error, &relay), None);
    assert!(!lifecycle.is_shutting_down());
}

#[tokio::test]
async fn message_event_is_relayed() {
    let backend = Arc::new(MockBackend::default());
    let lifecycle = Lifecycle::new();
    let relay = relay_for(&backend);

    let event = TransportEvent::Message(InboundMessage::direct("4915112345678@c.us", "hi"));
    assert_eq!(lifecycle.handle_event(event, &relay), None);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(backend.incoming_count(), 1);
}

#[tokio::test]
async fn no_relay_once_shutdown_has_begun() {
    let backend = Arc::new(MockBackend::default());
    let lifecycle = Lifecycle::new();
    let relay = relay_for(&backend);
    lifecycle.begin_shutdown(&ShutdownCause::Signal);

    let event = TransportEvent::Message(InboundMessage::direct("4915112345678@c.us", "hi"));
    lifecycle.handle_event(event, &relay);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(backend.incoming_count(), 0);
}

// ---------------------------------------------------------------------------
// Run loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn auth_failure_stops_the_bridge() {
    let lifecycle = Lifecycle::new();
    let relay = relay_for(&Arc::new(MockBackend::default()));
    let (tx, mut rx) = mpsc::channel(8);
    let shutdown = lifecycle.shutdown_signal();

    tx.send(TransportEvent::Ready).await.expect("send");
    tx.send(TransportEvent::AuthFailure {
        reason: Some("bad credentials".to_owned()),
    })
    .await
    .expect("send");

    let cause = lifecycle.run(&mut rx, &relay, None).await;

    assert_eq!(cause, ShutdownCause::AuthFailure("bad credentials".to_owned()));
    assert_eq!(cause.exit_code(), 1);
    assert!(*shutdown.borrow());
}

#[tokio::test]
async fn disconnect_without_reason_is_unknown() {
    let lifecycle = Lifecycle::new();
    let relay = relay_for(&Arc::new(MockBackend::default()));
    let (tx, mut rx) = mpsc::channel(8);

    tx.send(TransportEvent::Disconnected { reason: None })
        .await
        .expect("send");

    let cause = lifecycle.run(&mut rx, &relay, None).await;
    assert_eq!(cause, ShutdownCause::Disconnected("unknown".to_owned()));
}

#[tokio::test]
async fn closed_event_stream_stops_the_bridge() {
    let lifecycle = Lifecycle::new();
    let relay = relay_for(&Arc::new(MockBackend::default()));
    let (tx, mut rx) = mpsc::channel::<TransportEvent>(8);
    drop(tx);

    let cause = lifecycle.run(&mut rx, &relay, None).await;
    assert_eq!(cause, ShutdownCause::EventStreamClosed);
    assert!(lifecycle.is_shutting_down());
}

#[tokio::test(start_paused = true)]
async fn restart_timer_triggers_clean_exit() {
    let lifecycle = Lifecycle::new();
    let relay = relay_for(&Arc::new(MockBackend::default()));
    let (_tx, mut rx) = mpsc::channel::<TransportEvent>(8);

    let started = tokio::time::Instant::now();
    let cause = lifecycle
        .run(&mut rx, &relay, Some(Duration::from_secs(21_600)))
        .await;

    assert_eq!(cause, ShutdownCause::ScheduledRestart);
    assert_eq!(cause.exit_code(), 0);
    assert!(started.elapsed() >= Duration::from_secs(21_600));
}

// ---------------------------------------------------------------------------
// Engine supervision
// ---------------------------------------------------------------------------

#[tokio::test]
async fn panicked_engine_stops_the_bridge() {
    let lifecycle = Lifecycle::new();
    let relay = relay_for(&Arc::new(MockBackend::default()));
    let (_tx, mut rx) = mpsc::channel::<TransportEvent>(8);
    let shutdown = lifecycle.shutdown_signal();
    let mut engine: JoinHandle<()> =
        tokio::spawn(async { panic!("overflow when adding duration to instant") });

    let cause = lifecycle.supervise(&mut rx, &relay, None, &mut engine).await;

    assert!(matches!(cause, ShutdownCause::EngineStopped(_)), "got: {cause:?}");
    assert_eq!(cause.exit_code(), 1);
    assert!(*shutdown.borrow());
}

#[tokio::test]
async fn engine_returning_early_is_a_fault() {
    let lifecycle = Lifecycle::new();
    let relay = relay_for(&Arc::new(MockBackend::default()));
    let (_tx, mut rx) = mpsc::channel::<TransportEvent>(8);
    let mut engine = tokio::spawn(async {});

    let cause = lifecycle.supervise(&mut rx, &relay, None, &mut engine).await;

    assert_eq!(cause, ShutdownCause::EngineStopped("exited unexpectedly".to_owned()));
}

#[tokio::test]
async fn supervised_run_still_handles_transport_faults() {
    let lifecycle = Lifecycle::new();
    let relay = relay_for(&Arc::new(MockBackend::default()));
    let (tx, mut rx) = mpsc::channel(8);
    let mut engine = tokio::spawn(std::future::pending::<()>());

    tx.send(TransportEvent::Disconnected {
        reason: Some("LOGOUT".to_owned()),
    })
    .await
    .expect("send");

    let cause = lifecycle.supervise(&mut rx, &relay, None, &mut engine).await;

    assert_eq!(cause, ShutdownCause::Disconnected("LOGOUT".to_owned()));
    assert!(!engine.is_finished());
    engine.abort();
}

// ---------------------------------------------------------------------------
// Transport release
// ---------------------------------------------------------------------------

#[tokio::test]
async fn release_succeeds() {
    let lifecycle = Lifecycle::new();
    let transport = MockTransport::new();

    let released = lifecycle
        .release_transport(transport.as_ref(), Duration::from_secs(1))
        .await;

    assert!(released);
    assert_eq!(transport.release_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn hung_release_is_abandoned() {
    let lifecycle = Lifecycle::new();
    let transport = MockTransport::new();
    transport.hang_release();

    let released = lifecycle
        .release_transport(transport.as_ref(), Duration::from_secs(5))
        .await;

    assert!(!released);
}
