//! Limit state for one chat session.
//!
//! Holds the rate and token-budget deadlines and merges incoming signals into
//! them. Deadlines only ever move forward from trusted structured data, and
//! heuristic data only fills an empty slot. Slots clear themselves on the
//! first tick at or after their deadline.

use serde::{Deserialize, Serialize};

use super::signal::{LimitKind, LimitSignal, clamp_future};

/// Rate and token-budget deadlines (epoch ms; None = no active limit).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitState {
    /// When the request rate limit clears.
    pub rate_reset_at: Option<u64>,
    /// When the token budget resets.
    pub token_reset_at: Option<u64>,
    /// Budget units left, cleared together with `token_reset_at`.
    pub token_remaining: Option<u64>,
}

impl LimitState {
    /// Create an empty limit state.
    pub fn new() -> Self {
        Self::default()
    }

    /// True when at least one deadline is stored.
    pub fn has_pending(&self) -> bool {
        self.rate_reset_at.is_some() || self.token_reset_at.is_some()
    }

    pub fn reset_at(&self, kind: LimitKind) -> Option<u64> {
        match kind {
            LimitKind::Rate => self.rate_reset_at,
            LimitKind::Token => self.token_reset_at,
        }
    }

    fn slot_mut(&mut self, kind: LimitKind) -> &mut Option<u64> {
        match kind {
            LimitKind::Rate => &mut self.rate_reset_at,
            LimitKind::Token => &mut self.token_reset_at,
        }
    }

    /// Clear every slot whose deadline has passed. Returns true if anything changed.
    pub fn tick(&mut self, now: u64) -> bool {
        let mut changed = false;

        if self.rate_reset_at.is_some_and(|at| now >= at) {
            self.rate_reset_at = None;
            changed = true;
        }

        if self.token_reset_at.is_some_and(|at| now >= at) {
            self.token_reset_at = None;
            self.token_remaining = None;
            changed = true;
        }

        changed
    }

    /// Merge one signal. Returns true if the state changed.
    pub fn apply_signal(&mut self, signal: &LimitSignal) -> bool {
        let slot = self.slot_mut(signal.kind);
        let established = slot.is_none();

        let deadline_changed = match *slot {
            None => {
                *slot = Some(signal.reset_at);
                true
            }
            Some(prev) if signal.is_absolute && signal.reset_at > prev => {
                *slot = Some(signal.reset_at);
                true
            }
            Some(_) => false,
        };

        let mut remaining_changed = false;
        if signal.kind == LimitKind::Token && (signal.is_absolute || established) {
            if let Some(remaining) = signal.remaining {
                remaining_changed = self.token_remaining != Some(remaining);
                self.token_remaining = Some(remaining);
            }
        }

        if deadline_changed {
            tracing::warn!(
                kind = %signal.kind,
                reset_at = signal.reset_at,
                absolute = signal.is_absolute,
                "Limit engaged"
            );
        }

        deadline_changed || remaining_changed
    }

    /// Sweep expired slots at `now`, then merge `signals` in order.
    pub fn apply_signals(&mut self, signals: &[LimitSignal], now: u64) -> bool {
        let mut changed = self.tick(now);
        for signal in signals {
            changed |= self.apply_signal(signal);
        }
        changed
    }

    /// Apply a caller-supplied cooldown.
    ///
    /// Acts like a heuristic signal: establishes a deadline when the slot is
    /// empty and never shortens or extends an active one. Zero is a no-op.
    pub fn apply_manual_duration(&mut self, kind: LimitKind, seconds: u64, now: u64, min_future_ms: u64) -> bool {
        if seconds == 0 {
            return false;
        }
        let reset_at = clamp_future(now.saturating_add(seconds.saturating_mul(1000)), now, min_future_ms);
        self.apply_signals(&[LimitSignal::heuristic(kind, reset_at)], now)
    }

    /// Drop every deadline.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
