//! Backend reachability and the poll cadence derived from it.

use std::time::Duration;

/// Result of recording a poll outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    /// State did not change.
    Unchanged,
    /// Backend became reachable again.
    Restored,
    /// Backend stopped answering.
    Lost,
}

/// Tracks whether the backend is reachable and picks the next poll delay.
///
/// Starts out connected, so the first failure is reported once.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    connected: bool,
    fast: Duration,
    slow: Duration,
}

impl HealthMonitor {
    /// Create a monitor with the given connected/disconnected intervals.
    pub fn new(fast: Duration, slow: Duration) -> Self {
        Self {
            connected: true,
            fast,
            slow,
        }
    }

    /// Record a successful fetch.
    pub fn record_success(&mut self) -> HealthTransition {
        if self.connected {
            return HealthTransition::Unchanged;
        }
        self.connected = true;
        HealthTransition::Restored
    }

    /// Record a failed fetch.
    pub fn record_failure(&mut self) -> HealthTransition {
        if !self.connected {
            return HealthTransition::Unchanged;
        }
        self.connected = false;
        HealthTransition::Lost
    }

    /// Whether the backend answered the most recent fetch.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Delay before the next poll cycle.
    pub fn next_interval(&self) -> Duration {
        if self.connected {
            self.fast
        } else {
            self.slow
        }
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(Duration::from_millis(1_500), Duration::from_secs(10))
    }
}
