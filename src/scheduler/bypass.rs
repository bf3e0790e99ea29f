//! Sliding-window budget for HIGH priority bypasses.
//!
//! A bypass lets an urgent unit skip the queue entirely. Each tenant may grant
//! at most `floor(max_bypass_rate * combined_limit)` of them per window, so the
//! allowance scales with how much quota the tenant legitimately holds.

use std::time::Duration;

use tokio::time::Instant;

/// Per-tenant bypass accounting.
#[derive(Debug, Clone)]
pub struct BypassBudget {
    count: u64,
    window_start: Instant,
}

impl BypassBudget {
    pub fn new(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
        }
    }

    /// Bypasses allowed per window for a given combined limit.
    pub fn allowance(max_bypass_rate: f64, combined_limit: u64) -> u64 {
        (max_bypass_rate * combined_limit as f64).floor() as u64
    }

    /// Try to spend one bypass; `false` means fall back to normal admission.
    pub fn try_consume(
        &mut self,
        now: Instant,
        combined_limit: u64,
        max_bypass_rate: f64,
        window_len: Duration,
    ) -> bool {
        self.roll_window(now, window_len);

        if self.count < Self::allowance(max_bypass_rate, combined_limit) {
            self.count += 1;
            true
        } else {
            false
        }
    }

    /// Bypasses granted in the window containing `now`.
    pub fn count(&self, now: Instant, window_len: Duration) -> u64 {
        if self.window_elapsed(now, window_len) { 0 } else { self.count }
    }

    fn window_elapsed(&self, now: Instant, window_len: Duration) -> bool {
        now.saturating_duration_since(self.window_start) >= window_len
    }

    fn roll_window(&mut self, now: Instant, window_len: Duration) {
        if self.window_elapsed(now, window_len) {
            self.count = 0;
            self.window_start = now;
        }
    }
}
