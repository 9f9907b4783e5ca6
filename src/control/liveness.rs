//! Periodic liveness call with exponential backoff.
//!
//! Not a retry mechanism: the owner is woken at the deadline and decides
//! what to re-check. Disarming is the same as arming with a zero interval.

use std::time::Duration;

use tokio::time::Instant;

/// Re-armable periodic timer.
#[derive(Debug, Clone, Default)]
pub struct PeriodicCall {
    interval: Option<Duration>,
    deadline: Option<Instant>,
}

impl PeriodicCall {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm with `interval` from now. A zero interval disarms.
    pub fn arm(&mut self, interval: Duration) {
        if interval.is_zero() {
            self.disable_periodic_call();
            return;
        }
        self.interval = Some(interval);
        self.deadline = Some(Instant::now() + interval);
    }

    /// Double the interval and re-arm from now. No effect when disarmed.
    pub fn increase_call_interval(&mut self) {
        if let Some(interval) = self.interval {
            let doubled = interval.saturating_mul(2);
            tracing::debug!("Periodic call interval increased to {:?}", doubled);
            self.arm(doubled);
        }
    }

    pub fn disable_periodic_call(&mut self) {
        self.interval = None;
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// If the deadline has passed, schedule the next one and return `true`.
    pub fn fire(&mut self, now: Instant) -> bool {
        match (self.deadline, self.interval) {
            (Some(deadline), Some(interval)) if deadline <= now => {
                self.deadline = Some(now + interval);
                true
            }
            _ => false,
        }
    }
}
