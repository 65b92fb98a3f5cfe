//! Rate-limit and token-budget engine
//!
//! This module provides:
//! - Error classification into limit signals
//! - The per-session limit state and its merge policy
//! - Countdown derivations and the presentation status
//! - De-duplication of already processed errors

pub mod classify;
pub mod clock;
pub mod dedup;
pub mod policy;
pub mod signal;
pub mod state;
pub mod tracker;

pub use classify::{RATE_LIMITED_CODE, TOKEN_BUDGET_EXCEEDED_CODE, classify, classify_error, classify_with};
pub use clock::{
    LimitStatus, SessionClock, is_limited, is_rate_limited, is_token_limited, now_ms, rate_seconds_left,
    seconds_until, token_seconds_left,
};
pub use dedup::ProcessedErrors;
pub use policy::LimitPolicy;
pub use signal::{DEFAULT_RETRY_AFTER_SECS, LimitKind, LimitSignal, MIN_FUTURE_MS};
pub use state::LimitState;
pub use tracker::{AppliedLimits, LimitTracker};
