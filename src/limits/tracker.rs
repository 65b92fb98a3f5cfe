//! Session-owned limit tracker.
//!
//! Combines the limit state, the processed-error registry and the policy into
//! the single object a chat session mutates when errors arrive or time passes.

use std::sync::Arc;

use super::classify::classify_error;
use super::clock::{LimitStatus, seconds_until};
use super::dedup::ProcessedErrors;
use super::policy::LimitPolicy;
use super::signal::LimitKind;
use super::state::LimitState;
use crate::chat::OperationError;

/// What a single error contributed, for immediate display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppliedLimits {
    pub rate_secs: u64,
    pub token_secs: u64,
    pub remaining: Option<u64>,
}

#[derive(Debug, Default)]
pub struct LimitTracker {
    state: LimitState,
    processed: ProcessedErrors<OperationError>,
    policy: LimitPolicy,
}

impl LimitTracker {
    pub fn new(policy: LimitPolicy) -> Self {
        Self {
            state: LimitState::new(),
            processed: ProcessedErrors::new(),
            policy,
        }
    }

    pub fn policy(&self) -> &LimitPolicy {
        &self.policy
    }

    pub fn state(&self) -> &LimitState {
        &self.state
    }

    /// Classify and apply `err` unless this exact error object was seen before.
    /// Returns true if the limit state changed.
    pub fn ingest(&mut self, err: &Arc<OperationError>, now: u64) -> bool {
        if !self.processed.first_sighting(err) {
            log::debug!("Skipping already processed error: {}", err);
            return false;
        }
        let signals = classify_error(err, now, &self.policy);
        self.state.apply_signals(&signals, now)
    }

    /// Ingest every error currently held by the caller.
    pub fn observe<'a, I>(&mut self, errors: I, now: u64) -> bool
    where
        I: IntoIterator<Item = &'a Arc<OperationError>>,
    {
        let mut changed = false;
        for err in errors {
            changed |= self.ingest(err, now);
        }
        changed
    }

    /// Apply `err` and report the durations and count it carried.
    ///
    /// Unlike `ingest` this reports even for an already processed error, but
    /// the state is only touched on the first sighting.
    pub fn apply_limits_from_error(&mut self, err: &Arc<OperationError>, now: u64) -> AppliedLimits {
        let signals = classify_error(err, now, &self.policy);
        if self.processed.first_sighting(err) {
            self.state.apply_signals(&signals, now);
        }

        let mut applied = AppliedLimits::default();
        for signal in &signals {
            match signal.kind {
                LimitKind::Rate => applied.rate_secs = seconds_until(Some(signal.reset_at), now),
                LimitKind::Token => {
                    applied.token_secs = seconds_until(Some(signal.reset_at), now);
                    applied.remaining = signal.remaining;
                }
            }
        }
        applied
    }

    /// Manual rate cooldown from the UI; never shortens an active limit.
    pub fn apply_rate_limit(&mut self, seconds: u64, now: u64) -> bool {
        self.apply_manual_duration(LimitKind::Rate, seconds, now)
    }

    pub fn apply_manual_duration(&mut self, kind: LimitKind, seconds: u64, now: u64) -> bool {
        self.state
            .apply_manual_duration(kind, seconds, now, self.policy.min_future_ms)
    }

    /// Expiry sweep. Returns true if a slot cleared.
    pub fn tick(&mut self, now: u64) -> bool {
        let changed = self.state.tick(now);
        if changed {
            log::info!("Limit expired; pending: {}", self.state.has_pending());
        }
        changed
    }

    pub fn has_pending(&self) -> bool {
        self.state.has_pending()
    }

    /// Sweep, then derive the presentation status.
    pub fn status(&mut self, now: u64) -> LimitStatus {
        self.tick(now);
        LimitStatus::at(&self.state, now)
    }
}
