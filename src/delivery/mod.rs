//! Delivery engine: drains the backend's outbound queue into WhatsApp.
//!
//! One poll cycle fetches the pending batch and pushes each message through
//! a bounded send-retry, then a bounded ack-retry. The [`DedupStore`] keeps
//! already-sent identifiers out of later batches, and the [`HealthMonitor`]
//! slows polling while the backend is unreachable.
//!
//! The engine owns both state objects and runs as a single task, so no two
//! cycles overlap and neither object needs a lock.

pub mod health;
pub mod retry;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::backend::{Backend, OutboundMessage};
use crate::transport::{Transport, TransportError};

use self::health::{HealthMonitor, HealthTransition};
use self::retry::RetryPolicy;
use self::store::{ClearPolicy, DedupStore};

/// Tunables for the delivery engine.
#[derive(Debug, Clone)]
pub struct DeliverySettings {
    /// Poll interval while the backend is reachable.
    pub fast_interval: Duration,
    /// Poll interval while the backend is unreachable.
    pub slow_interval: Duration,
    /// Deferral while the transport session is not ready.
    pub not_ready_delay: Duration,
    /// Transport send budget.
    pub send_retry: RetryPolicy,
    /// Backend acknowledgment budget.
    pub ack_retry: RetryPolicy,
    /// Upper bound on a single transport send.
    pub send_timeout: Duration,
    /// How often quarantined entries are released.
    pub quarantine_clear_interval: Duration,
    /// Which entries the periodic clear releases.
    pub clear_policy: ClearPolicy,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            fast_interval: Duration::from_millis(1_500),
            slow_interval: Duration::from_secs(10),
            not_ready_delay: Duration::from_secs(2),
            send_retry: RetryPolicy::send_default(),
            ack_retry: RetryPolicy::ack_default(),
            send_timeout: Duration::from_secs(20),
            quarantine_clear_interval: Duration::from_secs(3_600),
            clear_policy: ClearPolicy::QuarantinedOnly,
        }
    }
}

/// What happened to one fetched message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Already delivered or quarantined; nothing sent.
    Skipped,
    /// Missing identifier, recipient, or body; nothing sent.
    Malformed,
    /// Sent and acknowledged.
    Delivered,
    /// Sent, but the acknowledgment budget ran out.
    Quarantined,
    /// Every send attempt failed; eligible again next cycle.
    SendFailed,
}

/// Point-in-time view of the engine, published after every cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineSnapshot {
    /// Whether the last fetch reached the backend.
    pub backend_connected: bool,
    /// Identifiers suppressed as delivered.
    pub delivered: usize,
    /// Identifiers held in quarantine.
    pub quarantined: usize,
    /// Completion time of the last cycle that contacted the backend.
    pub last_cycle: Option<DateTime<Utc>>,
}

/// The outbound poll loop.
pub struct DeliveryEngine {
    backend: Arc<dyn Backend>,
    transport: Arc<dyn Transport>,
    session_ready: watch::Receiver<bool>,
    store: DedupStore,
    health: HealthMonitor,
    settings: DeliverySettings,
    snapshot_tx: watch::Sender<EngineSnapshot>,
    last_cycle: Option<DateTime<Utc>>,
    last_transition: HealthTransition,
}

impl DeliveryEngine {
    /// Build an engine with an empty store and a connected health monitor.
    ///
    /// `session_ready` gates polling: cycles defer until it reads `true`.
    pub fn new(
        backend: Arc<dyn Backend>,
        transport: Arc<dyn Transport>,
        session_ready: watch::Receiver<bool>,
        settings: DeliverySettings,
    ) -> Self {
        let health = HealthMonitor::new(settings.fast_interval, settings.slow_interval);
        let (snapshot_tx, _) = watch::channel(EngineSnapshot {
            backend_connected: health.is_connected(),
            ..EngineSnapshot::default()
        });
        Self {
            backend,
            transport,
            session_ready,
            store: DedupStore::new(),
            health,
            settings,
            snapshot_tx,
            last_cycle: None,
            last_transition: HealthTransition::Unchanged,
        }
    }

    /// Subscribe to per-cycle snapshots.
    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// The dedup/quarantine store.
    pub fn store(&self) -> &DedupStore {
        &self.store
    }

    /// The backend health monitor.
    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    /// Run until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// The first cycle starts immediately. A cycle in progress always runs to
    /// completion; shutdown only stops the next one from being scheduled.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let clear_every = self.settings.quarantine_clear_interval;
        let mut next_clear = deadline_after(clear_every);
        let mut next_cycle = Instant::now();
        info!("delivery engine started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            // Shutdown is checked first so a due cycle never starts after it.
            tokio::select! {
                biased;
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                () = tokio::time::sleep_until(next_cycle) => {
                    let delay = self.run_cycle().await;
                    next_cycle = deadline_after(delay);
                }
                () = tokio::time::sleep_until(next_clear) => {
                    self.clear_quarantine();
                    next_clear = deadline_after(clear_every);
                }
            }
        }

        info!("delivery engine stopped");
    }

    /// Health transition caused by the most recent cycle.
    pub fn last_transition(&self) -> HealthTransition {
        self.last_transition
    }

    /// Run one poll cycle and return the delay before the next one.
    pub async fn run_cycle(&mut self) -> Duration {
        self.last_transition = HealthTransition::Unchanged;
        if !*self.session_ready.borrow() {
            debug!("transport session not ready, deferring poll");
            return self.settings.not_ready_delay;
        }

        match self.backend.fetch_outgoing().await {
            Ok(batch) => {
                self.last_transition = self.health.record_success();
                if self.last_transition == HealthTransition::Restored {
                    info!("backend connection restored");
                }
                if !batch.is_empty() {
                    debug!(count = batch.len(), "processing outbound batch");
                }
                for message in &batch {
                    self.deliver(message).await;
                }
            }
            Err(e) => {
                self.last_transition = self.health.record_failure();
                if self.last_transition == HealthTransition::Lost {
                    warn!(error = %e, "backend unreachable, slowing poll");
                } else {
                    debug!(error = %e, "backend still unreachable");
                }
            }
        }

        self.last_cycle = Some(Utc::now());
        self.publish();
        self.health.next_interval()
    }

    /// Drive one message through send-retry and ack-retry.
    pub async fn deliver(&mut self, message: &OutboundMessage) -> DeliveryOutcome {
        if !message.is_well_formed() {
            debug!(message_id = %message.message_id, "skipping malformed outbound message");
            return DeliveryOutcome::Malformed;
        }
        let id = message.message_id.as_str();
        if self.store.contains(id) {
            return DeliveryOutcome::Skipped;
        }

        if !self.send_with_retry(message).await {
            error!(
                message_id = %id,
                attempts = self.settings.send_retry.max_attempts(),
                "delivery failed, will retry next cycle"
            );
            return DeliveryOutcome::SendFailed;
        }
        self.store.mark_delivered(id);

        if self.ack_with_retry(id).await {
            info!(message_id = %id, "message delivered and acknowledged");
            DeliveryOutcome::Delivered
        } else {
            self.store.mark_quarantined(id);
            error!(
                message_id = %id,
                attempts = self.settings.ack_retry.max_attempts(),
                "acknowledgment failed, message quarantined"
            );
            DeliveryOutcome::Quarantined
        }
    }

    /// Release entries per the configured clear policy. Returns the count.
    pub fn clear_quarantine(&mut self) -> usize {
        let released = self.store.clear(self.settings.clear_policy);
        if released > 0 {
            info!(released, policy = ?self.settings.clear_policy, "released quarantined messages");
        } else {
            debug!("quarantine clear: nothing to release");
        }
        self.publish();
        released
    }

    async fn send_with_retry(&self, message: &OutboundMessage) -> bool {
        let policy = self.settings.send_retry;
        let timeout = self.settings.send_timeout;
        for attempt in 1..=policy.max_attempts() {
            let sent = tokio::time::timeout(
                timeout,
                self.transport.send(&message.recipient, &message.body),
            )
            .await;
            match sent {
                Ok(Ok(())) => {
                    if attempt > 1 {
                        info!(message_id = %message.message_id, attempt, "send succeeded after retry");
                    }
                    return true;
                }
                Ok(Err(e)) => {
                    warn!(message_id = %message.message_id, attempt, error = %e, "transport send failed");
                }
                Err(_) => {
                    let e = TransportError::Timeout {
                        millis: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    };
                    warn!(message_id = %message.message_id, attempt, error = %e, "transport send failed");
                }
            }
            if let Some(delay) = policy.delay_after(attempt) {
                tokio::time::sleep(delay).await;
            }
        }
        false
    }

    async fn ack_with_retry(&self, message_id: &str) -> bool {
        let policy = self.settings.ack_retry;
        for attempt in 1..=policy.max_attempts() {
            match self.backend.ack(message_id).await {
                Ok(()) => return true,
                Err(e) => {
                    warn!(message_id, attempt, error = %e, "acknowledgment failed");
                }
            }
            if let Some(delay) = policy.delay_after(attempt) {
                tokio::time::sleep(delay).await;
            }
        }
        false
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(EngineSnapshot {
            backend_connected: self.health.is_connected(),
            delivered: self.store.delivered_count(),
            quarantined: self.store.quarantined_count(),
            last_cycle: self.last_cycle,
        });
    }
}

/// Roughly thirty years; far enough ahead to never fire.
const FAR_FUTURE: Duration = Duration::from_secs(946_080_000);

/// `now + delay`, clamped instead of overflowing the clock.
pub(crate) fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}
