//! Quota tracking per resource class.
//!
//! The upstream reports its rolling quota (remaining / limit / reset) on every
//! response. Callers feed those numbers back here; the tracker keeps the most
//! recent observation per resource class and never interpolates between them.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_RESET: &str = "x-ratelimit-reset";
pub const HEADER_RESOURCE: &str = "x-ratelimit-resource";

/// An independently rate-limited API surface, e.g. `graphql` or `rest`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceClass(String);

impl ResourceClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn graphql() -> Self {
        Self::new("graphql")
    }

    pub fn rest() -> Self {
        Self::new("rest")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resource named by an `x-ratelimit-resource` header, if present.
    pub fn from_headers<'a, I>(headers: I) -> Option<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        headers
            .into_iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(HEADER_RESOURCE))
            .map(|(_, value)| Self::new(value.trim()))
    }
}

impl From<&str> for ResourceClass {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ResourceClass {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A fresh quota observation reported by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUpdate {
    pub remaining: u64,
    pub limit: u64,
    pub reset_at: DateTime<Utc>,
}

impl QuotaUpdate {
    pub fn new(remaining: u64, limit: u64, reset_at: DateTime<Utc>) -> Self {
        Self {
            remaining,
            limit,
            reset_at,
        }
    }

    /// Parse GitHub-style rate-limit headers.
    ///
    /// Header names match case-insensitively; `x-ratelimit-reset` is epoch seconds.
    pub fn from_headers<'a, I>(headers: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut remaining = None;
        let mut limit = None;
        let mut reset = None;

        for (name, value) in headers {
            let slot = if name.eq_ignore_ascii_case(HEADER_REMAINING) {
                &mut remaining
            } else if name.eq_ignore_ascii_case(HEADER_LIMIT) {
                &mut limit
            } else if name.eq_ignore_ascii_case(HEADER_RESET) {
                &mut reset
            } else {
                continue;
            };
            let parsed = value
                .trim()
                .parse::<u64>()
                .map_err(|e| SchedulerError::InvalidHeader(format!("{}: {:?} ({})", name, value, e)))?;
            *slot = Some(parsed);
        }

        let missing = |header: &str| SchedulerError::InvalidHeader(format!("missing {}", header));
        let remaining = remaining.ok_or_else(|| missing(HEADER_REMAINING))?;
        let limit = limit.ok_or_else(|| missing(HEADER_LIMIT))?;
        let reset = reset.ok_or_else(|| missing(HEADER_RESET))?;

        let reset_at = i64::try_from(reset)
            .ok()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .ok_or_else(|| SchedulerError::InvalidHeader(format!("{} out of range: {}", HEADER_RESET, reset)))?;

        Ok(Self::new(remaining, limit, reset_at))
    }
}

/// Known quota for one resource class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaState {
    /// Calls left in the current window (never above `limit`).
    pub remaining: u64,
    /// Window size, always > 0.
    pub limit: u64,
    /// When the window resets; the earliest legitimate retry once exhausted.
    pub reset_at: DateTime<Utc>,
}

impl QuotaState {
    /// Fraction of the quota consumed, in [0, 1].
    pub fn utilization(&self) -> f64 {
        if self.limit == 0 {
            return 0.0;
        }
        let used = self.limit.saturating_sub(self.remaining) as f64;
        (used / self.limit as f64).clamp(0.0, 1.0)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }
}

/// One tenant's quota per resource class.
#[derive(Debug, Default)]
pub struct QuotaTracker {
    states: HashMap<ResourceClass, QuotaState>,
}

impl QuotaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the state for `class` with the caller's latest observation.
    pub fn update(&mut self, class: &ResourceClass, update: QuotaUpdate) {
        if update.limit == 0 {
            tracing::warn!(resource = %class, "Ignoring quota update with zero limit");
            return;
        }
        let remaining = update.remaining.min(update.limit);
        self.states.insert(
            class.clone(),
            QuotaState {
                remaining,
                limit: update.limit,
                reset_at: update.reset_at,
            },
        );
    }

    pub fn get(&self, class: &ResourceClass) -> Option<&QuotaState> {
        self.states.get(class)
    }

    /// Utilization for `class`; unknown classes are assumed healthy.
    pub fn utilization(&self, class: &ResourceClass) -> f64 {
        self.states.get(class).map(QuotaState::utilization).unwrap_or(0.0)
    }

    pub fn is_exhausted(&self, class: &ResourceClass) -> bool {
        self.states.get(class).is_some_and(QuotaState::is_exhausted)
    }

    /// Sum of limits across every known resource class.
    pub fn combined_limit(&self) -> u64 {
        self.states.values().map(|s| s.limit).fold(0, u64::saturating_add)
    }

    /// Presume windows whose reset time has passed are restored.
    ///
    /// Holds until the caller reports fresh numbers. Returns the classes that
    /// rolled over.
    pub fn roll_over(&mut self, now: DateTime<Utc>) -> Vec<ResourceClass> {
        let mut rolled = Vec::new();
        for (class, state) in self.states.iter_mut() {
            if state.remaining < state.limit && now >= state.reset_at {
                state.remaining = state.limit;
                rolled.push(class.clone());
            }
        }
        rolled
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }
}
