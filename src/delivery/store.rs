//! Dedup/quarantine bookkeeping for outbound message identifiers.
//!
//! An identifier is present exactly when the engine must not dispatch it on
//! the next poll. Absence means eligible. Nothing here is persisted: a
//! restart forgets all history and the backend's queue becomes the only
//! record of what is still unacknowledged.

use std::collections::HashMap;

use serde::Deserialize;

/// Why an identifier is held out of dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// The transport accepted the send. Suppressed for the rest of the process.
    Delivered,
    /// Sent, but the acknowledgment budget ran out. Held until the next clear.
    Quarantined,
}

/// Which entries a periodic clear releases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearPolicy {
    /// Release only quarantined entries; delivered ones stay suppressed.
    #[default]
    QuarantinedOnly,
    /// Release everything, including acknowledged deliveries.
    All,
}

/// Process-wide set of identifiers that must not be re-dispatched right now.
#[derive(Debug, Default)]
pub struct DedupStore {
    entries: HashMap<String, DeliveryState>,
}

impl DedupStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `message_id` is currently suppressed.
    pub fn contains(&self, message_id: &str) -> bool {
        self.entries.contains_key(message_id)
    }

    /// Current state of `message_id`, if tracked.
    pub fn state(&self, message_id: &str) -> Option<DeliveryState> {
        self.entries.get(message_id).copied()
    }

    /// Record a successful transport send.
    pub fn mark_delivered(&mut self, message_id: &str) {
        self.entries
            .insert(message_id.to_owned(), DeliveryState::Delivered);
    }

    /// Record an acknowledgment that exhausted its budget.
    pub fn mark_quarantined(&mut self, message_id: &str) {
        self.entries
            .insert(message_id.to_owned(), DeliveryState::Quarantined);
    }

    /// Release entries according to `policy`. Returns how many were released.
    pub fn clear(&mut self, policy: ClearPolicy) -> usize {
        let before = self.entries.len();
        match policy {
            ClearPolicy::QuarantinedOnly => self
                .entries
                .retain(|_, state| *state != DeliveryState::Quarantined),
            ClearPolicy::All => self.entries.clear(),
        }
        before.saturating_sub(self.entries.len())
    }

    /// Number of tracked identifiers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries in [`DeliveryState::Delivered`].
    pub fn delivered_count(&self) -> usize {
        self.count(DeliveryState::Delivered)
    }

    /// Number of entries in [`DeliveryState::Quarantined`].
    pub fn quarantined_count(&self) -> usize {
        self.count(DeliveryState::Quarantined)
    }

    fn count(&self, wanted: DeliveryState) -> usize {
        self.entries.values().filter(|s| **s == wanted).count()
    }
}
