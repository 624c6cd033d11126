//! Lifecycle controller: startup gating, coordinated shutdown, and the
//! scheduled stability restart.
//!
//! Polling is gated on the session-ready flag, which flips when the sidecar
//! reports `ready`. Shutdown is triggered by SIGINT/SIGTERM, an auth
//! failure, a disconnect, a dead event stream, a stopped delivery engine,
//! or the restart timer. The first trigger wins; later ones are no-ops.

use std::fmt;
use std::future::pending;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::relay::IncomingRelay;
use crate::transport::{Transport, TransportEvent};

/// Why the bridge is shutting down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownCause {
    /// SIGINT or SIGTERM.
    Signal,
    /// WhatsApp rejected the stored credentials.
    AuthFailure(String),
    /// The WhatsApp session was closed.
    Disconnected(String),
    /// Periodic restart for long-run stability.
    ScheduledRestart,
    /// The sidecar event listener stopped unexpectedly.
    EventStreamClosed,
    /// The delivery engine task ended before shutdown was requested.
    EngineStopped(String),
}

impl ShutdownCause {
    /// Whether the cause is a fault rather than a requested stop.
    pub fn is_fault(&self) -> bool {
        !matches!(self, Self::Signal | Self::ScheduledRestart)
    }

    /// Process exit code: 0 for requested stops, 1 for faults.
    pub fn exit_code(&self) -> u8 {
        u8::from(self.is_fault())
    }
}

impl fmt::Display for ShutdownCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal => write!(f, "termination signal"),
            Self::AuthFailure(reason) => write!(f, "authentication failure: {reason}"),
            Self::Disconnected(reason) => write!(f, "transport disconnected: {reason}"),
            Self::ScheduledRestart => write!(f, "scheduled stability restart"),
            Self::EventStreamClosed => write!(f, "transport event stream closed"),
            Self::EngineStopped(reason) => write!(f, "delivery engine stopped: {reason}"),
        }
    }
}

/// Owns the shutdown and session-ready flags shared with the other tasks.
pub struct Lifecycle {
    shutdown_tx: watch::Sender<bool>,
    ready_tx: watch::Sender<bool>,
    begun: AtomicBool,
}

impl Lifecycle {
    /// Create a controller with the session not ready and no shutdown pending.
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let (ready_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            ready_tx,
            begun: AtomicBool::new(false),
        }
    }

    /// Receiver that flips to `true` once shutdown begins.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Receiver that flips to `true` once the transport session is ready.
    pub fn session_ready(&self) -> watch::Receiver<bool> {
        self.ready_tx.subscribe()
    }

    /// Whether the transport session is ready.
    pub fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.begun.load(Ordering::SeqCst)
    }

    /// Mark shutdown as begun and stop further poll scheduling.
    ///
    /// Returns `false` if shutdown had already begun.
    pub fn begin_shutdown(&self, cause: &ShutdownCause) -> bool {
        if self.begun.swap(true, Ordering::SeqCst) {
            info!(%cause, "shutdown already in progress, ignoring trigger");
            return false;
        }
        if cause.is_fault() {
            error!(%cause, "shutting down");
        } else {
            info!(%cause, "shutting down");
        }
        self.shutdown_tx.send_replace(true);
        true
    }

    /// Apply one transport event. Returns a cause when the event is fatal.
    pub fn handle_event(
        &self,
        event: TransportEvent,
        relay: &IncomingRelay,
    ) -> Option<ShutdownCause> {
        match event {
            TransportEvent::Ready => {
                if !self.ready_tx.send_replace(true) {
                    info!("WhatsApp session ready, delivery polling enabled");
                }
                None
            }
            TransportEvent::Pairing { .. } => {
                warn!("WhatsApp session needs pairing, scan the code shown by the sidecar");
                None
            }
            TransportEvent::AuthFailure { reason } => Some(ShutdownCause::AuthFailure(
                reason.unwrap_or_else(|| "unknown".to_owned()),
            )),
            TransportEvent::Disconnected { reason } => Some(ShutdownCause::Disconnected(
                reason.unwrap_or_else(|| "unknown".to_owned()),
            )),
            TransportEvent::Error { message } => {
                warn!(error = %message, "WhatsApp client error");
                None
            }
            TransportEvent::Message(message) => {
                if !self.is_shutting_down() {
                    relay.spawn_relay(message);
                }
                None
            }
        }
    }

    /// Consume transport events until something triggers shutdown.
    ///
    /// Watches termination signals and the optional restart timer alongside
    /// the event stream. Returns the cause after flagging shutdown.
    pub async fn run(
        &self,
        events: &mut mpsc::Receiver<TransportEvent>,
        relay: &IncomingRelay,
        restart_interval: Option<Duration>,
    ) -> ShutdownCause {
        let restart = async {
            match restart_interval {
                Some(interval) => tokio::time::sleep(interval).await,
                None => pending::<()>().await,
            }
        };
        tokio::pin!(restart);
        let signal = termination_signal();
        tokio::pin!(signal);

        let cause = loop {
            tokio::select! {
                () = &mut signal => break ShutdownCause::Signal,
                () = &mut restart => break ShutdownCause::ScheduledRestart,
                event = events.recv() => match event {
                    Some(event) => {
                        if let Some(cause) = self.handle_event(event, relay) {
                            break cause;
                        }
                    }
                    None => break ShutdownCause::EventStreamClosed,
                },
            }
        };

        self.begin_shutdown(&cause);
        cause
    }

    /// [`Lifecycle::run`], also watching the delivery engine task.
    ///
    /// The engine only returns once shutdown is flagged, so an engine that
    /// finishes or panics first is a fault.
    pub async fn supervise(
        &self,
        events: &mut mpsc::Receiver<TransportEvent>,
        relay: &IncomingRelay,
        restart_interval: Option<Duration>,
        engine: &mut JoinHandle<()>,
    ) -> ShutdownCause {
        tokio::select! {
            cause = self.run(events, relay, restart_interval) => cause,
            result = engine => {
                let reason = match result {
                    Ok(()) => "exited unexpectedly".to_owned(),
                    Err(e) => e.to_string(),
                };
                let cause = ShutdownCause::EngineStopped(reason);
                self.begin_shutdown(&cause);
                cause
            }
        }
    }

    /// Release the transport session, best effort, within `timeout`.
    ///
    /// Returns whether the release completed successfully.
    pub async fn release_transport(&self, transport: &dyn Transport, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, transport.release()).await {
            Ok(Ok(())) => {
                info!("transport session released");
                true
            }
            Ok(Err(e)) => {
                warn!(error = %e, "failed to release transport session");
                false
            }
            Err(_) => {
                warn!(
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "transport release timed out"
                );
                false
            }
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves on SIGINT, or SIGTERM on Unix.
async fn termination_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        pending::<()>().await;
    }
}
