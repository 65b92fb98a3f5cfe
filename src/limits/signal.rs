//! Limit signals: normalized extractions from a rejected operation's error.

use serde::{Deserialize, Serialize};

/// Minimum distance into the future for any computed deadline (ms).
pub const MIN_FUTURE_MS: u64 = 1500;

/// Cooldown used when a rate limit is reported without any duration (seconds).
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 30;

/// Which of the two gated resources a signal refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitKind {
    /// Short-lived request frequency cooldown
    Rate,
    /// Longer-lived language-model token quota
    Token,
}

impl std::fmt::Display for LimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitKind::Rate => write!(f, "rate"),
            LimitKind::Token => write!(f, "token"),
        }
    }
}

/// A new deadline (and optionally a remaining count) for one limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitSignal {
    pub kind: LimitKind,
    /// Epoch milliseconds after which the limit clears
    pub reset_at: u64,
    /// Whether `reset_at` came from structured error metadata
    pub is_absolute: bool,
    /// Budget units left (token kind only)
    pub remaining: Option<u64>,
}

impl LimitSignal {
    /// Signal from trusted structured metadata.
    pub fn absolute(kind: LimitKind, reset_at: u64) -> Self {
        Self {
            kind,
            reset_at,
            is_absolute: true,
            remaining: None,
        }
    }

    /// Signal from a free-text hint, a transport header or a default.
    pub fn heuristic(kind: LimitKind, reset_at: u64) -> Self {
        Self {
            kind,
            reset_at,
            is_absolute: false,
            remaining: None,
        }
    }

    /// Attach a remaining budget count.
    pub fn with_remaining(mut self, remaining: Option<u64>) -> Self {
        self.remaining = remaining;
        self
    }

    /// Push `reset_at` to at least `now + min_future_ms`.
    pub fn clamped(mut self, now: u64, min_future_ms: u64) -> Self {
        self.reset_at = clamp_future(self.reset_at, now, min_future_ms);
        self
    }
}

/// Clamp a deadline so it lies at least `min_future_ms` after `now`.
pub fn clamp_future(reset_at: u64, now: u64, min_future_ms: u64) -> u64 {
    reset_at.max(now.saturating_add(min_future_ms))
}
