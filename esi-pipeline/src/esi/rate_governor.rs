//! Local approximation of the upstream call budget.
//!
//! The governor trusts `X-ESI-Error-Limit-*` headers when a response carries
//! them. Otherwise it decrements its own estimate per call and refills it when
//! the window elapses. The upstream enforces the real limit; this only keeps
//! the pipeline from walking into it.

use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::RateLimitSnapshot;

/// Rejection returned when the budget is at or below the safety threshold.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("rate limit reached: {remaining} remaining, threshold {threshold}")]
pub struct RateLimitReached {
    pub remaining: u32,
    pub threshold: f64,
}

#[derive(Debug)]
struct BudgetState {
    remaining: u32,
    reset_at: Instant,
}

/// Tracks remaining upstream budget and gates calls.
#[derive(Debug)]
pub struct RateGovernor {
    state: Mutex<BudgetState>,
    total: u32,
    buffer_percent: f64,
    window: Duration,
}

impl RateGovernor {
    pub fn new(total: u32, buffer_percent: f64, window: Duration) -> Self {
        Self {
            state: Mutex::new(BudgetState {
                remaining: total,
                reset_at: Instant::now() + window,
            }),
            total,
            buffer_percent,
            window,
        }
    }

    /// Budget level at or below which calls are refused.
    pub fn threshold(&self) -> f64 {
        f64::from(self.total) * self.buffer_percent / 100.0
    }

    fn refill_if_elapsed(&self, state: &mut BudgetState) {
        let now = Instant::now();
        if now >= state.reset_at {
            if state.remaining != self.total {
                trace!(total = self.total, "Rate budget window elapsed, refilling");
            }
            state.remaining = self.total;
            state.reset_at = now + self.window;
        }
    }

    /// Current remaining budget.
    pub fn remaining(&self) -> u32 {
        let mut state = self.state.lock();
        self.refill_if_elapsed(&mut state);
        state.remaining
    }

    /// Decide whether a call may proceed. Returns the remaining budget when it may.
    pub fn check(&self) -> Result<u32, RateLimitReached> {
        let mut state = self.state.lock();
        self.refill_if_elapsed(&mut state);

        let threshold = self.threshold();
        if f64::from(state.remaining) <= threshold {
            debug!(
                remaining = state.remaining,
                threshold, "Rate governor refusing call"
            );
            return Err(RateLimitReached {
                remaining: state.remaining,
                threshold,
            });
        }
        Ok(state.remaining)
    }

    /// Account for a completed call.
    ///
    /// With a header snapshot the reported values replace the estimate;
    /// without one the estimate drops by one.
    pub fn record_call(&self, snapshot: Option<RateLimitSnapshot>) {
        let mut state = self.state.lock();
        match snapshot {
            Some(snapshot) => self.apply_snapshot(&mut state, snapshot),
            None => {
                self.refill_if_elapsed(&mut state);
                state.remaining = state.remaining.saturating_sub(1);
            }
        }
    }

    /// Overwrite the estimate with an observed snapshot.
    pub fn observe(&self, snapshot: RateLimitSnapshot) {
        let mut state = self.state.lock();
        self.apply_snapshot(&mut state, snapshot);
    }

    fn apply_snapshot(&self, state: &mut BudgetState, snapshot: RateLimitSnapshot) {
        state.remaining = snapshot.remaining.min(self.total);
        state.reset_at = Instant::now() + snapshot.reset_after;
    }
}
