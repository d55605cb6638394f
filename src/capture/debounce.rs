//! Quiet-period scheduler
//!
//! Two states: `Idle` (nothing pending) and `Pending` (a deadline is armed).
//! Every arm while pending *resets* the deadline to `now + period`, so the
//! flush fires only after a full quiet period with no further activity.
//! Time is passed in, never read, which keeps the contract testable without
//! waiting on a real clock.

use std::time::Duration;
use tokio::time::Instant;

/// Quiet period observed on the chat pages
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    Pending { deadline: Instant },
}

#[derive(Debug, Clone)]
pub struct QuietPeriodTimer {
    period: Duration,
    state: DebounceState,
}

impl QuietPeriodTimer {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            state: DebounceState::Idle,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn state(&self) -> DebounceState {
        self.state
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, DebounceState::Pending { .. })
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            DebounceState::Idle => None,
            DebounceState::Pending { deadline } => Some(deadline),
        }
    }

    /// Arm from idle, or push an armed deadline back to `now + period`
    pub fn arm(&mut self, now: Instant) {
        self.state = DebounceState::Pending {
            deadline: now + self.period,
        };
    }

    /// Drop an armed deadline without firing
    pub fn reset(&mut self) {
        self.state = DebounceState::Idle;
    }

    /// Fire if the deadline has passed, returning to idle. Returns whether it fired.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.state {
            DebounceState::Pending { deadline } if now >= deadline => {
                self.state = DebounceState::Idle;
                true
            }
            _ => false,
        }
    }
}

impl Default for QuietPeriodTimer {
    fn default() -> Self {
        Self::new(DEFAULT_QUIET_PERIOD)
    }
}
