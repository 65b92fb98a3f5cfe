//! Limit clock: countdown derivations over `(LimitState, now)`.
//!
//! Everything here is pure. `now` is always passed in, so callers decide where
//! time comes from (the session clock in production, literals in tests).

use serde::{Deserialize, Serialize};

use super::signal::LimitKind;
use super::state::LimitState;
use crate::format::format_duration;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Whole seconds until `reset_at`, rounded up, never 0 while still in the future.
pub fn seconds_until(reset_at: Option<u64>, now: u64) -> u64 {
    match reset_at {
        Some(at) if at > now => (at - now).div_ceil(1000).max(1),
        _ => 0,
    }
}

pub fn is_rate_limited(state: &LimitState, now: u64) -> bool {
    state.rate_reset_at.is_some_and(|at| at > now)
}

pub fn is_token_limited(state: &LimitState, now: u64) -> bool {
    state.token_reset_at.is_some_and(|at| at > now)
}

pub fn rate_seconds_left(state: &LimitState, now: u64) -> u64 {
    seconds_until(state.rate_reset_at, now)
}

pub fn token_seconds_left(state: &LimitState, now: u64) -> u64 {
    seconds_until(state.token_reset_at, now)
}

/// Whether the gate for `kind` is closed.
pub fn is_limited(state: &LimitState, kind: LimitKind, now: u64) -> bool {
    match kind {
        LimitKind::Rate => is_rate_limited(state, now),
        LimitKind::Token => is_token_limited(state, now),
    }
}

/// What the presentation layer sees on each render.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitStatus {
    pub is_rate_limited: bool,
    pub rate_seconds_left: u64,
    pub is_token_limited: bool,
    pub token_seconds_left: u64,
    pub token_remaining: Option<u64>,
}

impl LimitStatus {
    /// Derive the status of `state` at `now`.
    pub fn at(state: &LimitState, now: u64) -> Self {
        Self {
            is_rate_limited: is_rate_limited(state, now),
            rate_seconds_left: rate_seconds_left(state, now),
            is_token_limited: is_token_limited(state, now),
            token_seconds_left: token_seconds_left(state, now),
            token_remaining: state.token_remaining,
        }
    }

    /// True when either gate blocks sending.
    pub fn is_blocked(&self) -> bool {
        self.is_rate_limited || self.is_token_limited
    }

    /// User-facing notice text; empty while nothing is limited.
    pub fn notice_lines(&self) -> Vec<String> {
        if !self.is_blocked() {
            return Vec::new();
        }

        let mut lines = Vec::new();
        if self.is_rate_limited {
            lines.push(format!(
                "You're currently rate limited. Try again in {}.",
                format_duration(self.rate_seconds_left * 1000)
            ));
        }
        if self.is_token_limited {
            lines.push(format!(
                "You're out of token budget. Reset in {}.",
                format_duration(self.token_seconds_left * 1000)
            ));
        }
        if let Some(remaining) = self.token_remaining {
            lines.push(format!("Remaining tokens: {}", remaining));
        }
        lines
    }
}

/// Epoch-millisecond clock for one chat session.
///
/// Anchored to the wall clock once, then advanced by tokio's monotonic clock,
/// so countdowns never jump with wall-clock adjustments and paused-time tests
/// see `tokio::time::advance` reflected in `now`.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    epoch_ms: u64,
    anchor: tokio::time::Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self::anchored_at(now_ms())
    }

    /// Clock whose current reading is `epoch_ms`.
    pub fn anchored_at(epoch_ms: u64) -> Self {
        Self {
            epoch_ms,
            anchor: tokio::time::Instant::now(),
        }
    }

    pub fn now(&self) -> u64 {
        self.epoch_ms + self.anchor.elapsed().as_millis() as u64
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}
