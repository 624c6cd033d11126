//! Fixed-delay retry budgets for transport sends and acknowledgments.

use std::time::Duration;

/// A bounded retry budget with a fixed pause between failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// Create a policy. A zero `max_attempts` is raised to one.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Default budget for transport sends: 3 attempts, 2 s apart.
    pub fn send_default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }

    /// Default budget for backend acknowledgments: 3 attempts, 3 s apart.
    pub fn ack_default() -> Self {
        Self::new(3, Duration::from_secs(3))
    }

    /// Same budget, no pauses. Used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    /// Total attempts allowed.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Pause between failed attempts.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Delay to wait after failed attempt `attempt` (1-based), or `None` once
    /// the budget is exhausted.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_attempts).then_some(self.delay)
    }
}
