//! Error classification
//!
//! Inspects an arbitrary rejected-operation error and extracts the rate and
//! token-budget signals it carries. The error arrives as loosely shaped JSON
//! (GraphQL errors, a transport error, a bare message); missing or malformed
//! fields are skipped and anything unrecognized yields no signal.
//!
//! Precedence per kind:
//! 1. Structured `graphQLErrors[].extensions.resetTime` (absolute)
//! 2. Free text of those GraphQL errors' messages
//! 3. HTTP 429 on `networkError`, using `retry-after` or the default cooldown
//! 4. Free text of the top-level `message`
//! 5. Default cooldown for a recognized code that gave no deadline at all

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::policy::LimitPolicy;
use super::signal::{LimitKind, LimitSignal};
use crate::chat::OperationError;

/// GraphQL error code for request rate limiting
pub const RATE_LIMITED_CODE: &str = "RATE_LIMITED";

/// GraphQL error code for an exhausted token budget
pub const TOKEN_BUDGET_EXCEEDED_CODE: &str = "TOKEN_BUDGET_EXCEEDED";

/// HTTP status for too many requests
const TOO_MANY_REQUESTS: u64 = 429;

/// Timestamps below this are epoch seconds, at or above are epoch milliseconds
const EPOCH_MS_THRESHOLD: f64 = 1e12;

static TRY_AGAIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)try again in\s+(\d+)\s*seconds?").expect("valid regex"));

static REMAINING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)remaining:\s*(\d+)\s*tokens?").expect("valid regex"));

static RESETS_IN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)resets in\s+(\d+)\s*hours?").expect("valid regex"));

/// Classify an error payload with the default policy.
pub fn classify(err: &Value, now: u64) -> Vec<LimitSignal> {
    classify_with(err, now, &LimitPolicy::default())
}

/// Classify an operation error's payload.
pub fn classify_error(err: &OperationError, now: u64, policy: &LimitPolicy) -> Vec<LimitSignal> {
    classify_with(err.payload(), now, policy)
}

/// Classify an error payload.
///
/// Never fails: malformed or unknown shapes produce an empty vector. Every
/// returned signal has `reset_at >= now + policy.min_future_ms`.
pub fn classify_with(err: &Value, now: u64, policy: &LimitPolicy) -> Vec<LimitSignal> {
    let mut found = Extraction::default();

    let graph_errors: Vec<&Value> = err
        .get("graphQLErrors")
        .and_then(Value::as_array)
        .map(|errors| errors.iter().collect())
        .unwrap_or_default();

    let recognized: Vec<(LimitKind, &Value)> = graph_errors
        .iter()
        .filter_map(|entry| error_code(entry).map(|kind| (kind, *entry)))
        .collect();

    for (kind, entry) in &recognized {
        let extensions = entry.get("extensions");
        if let Some(reset_at) = extensions.and_then(|ext| ext.get("resetTime")).and_then(to_epoch_ms) {
            found.offer_absolute(*kind, reset_at);
        }
        if *kind == LimitKind::Token && found.remaining.is_none() {
            found.remaining = extensions.and_then(|ext| ext.get("remaining")).and_then(to_count);
        }
    }

    for (_, entry) in &recognized {
        if let Some(text) = entry.get("message").and_then(Value::as_str) {
            found.scan_text(text, now);
        }
    }

    if found.rate.is_none() && transport_status(err) == Some(TOO_MANY_REQUESTS) {
        let secs = retry_after_secs(err)
            .filter(|secs| *secs > 0)
            .unwrap_or(policy.default_retry_after_secs);
        found.offer_heuristic(LimitKind::Rate, now.saturating_add(secs.saturating_mul(1000)));
    }

    if found.rate.is_none() || found.token.is_none() {
        let message = match err {
            Value::String(text) => Some(text.as_str()),
            _ => err.get("message").and_then(Value::as_str),
        };
        if let Some(text) = message {
            found.scan_text(text, now);
        }
    }

    let fallback = now.saturating_add(policy.default_retry_after_secs.saturating_mul(1000));
    for (kind, _) in &recognized {
        found.offer_heuristic(*kind, fallback);
    }

    let signals = found.into_signals(now, policy.min_future_ms);
    if !signals.is_empty() {
        log::debug!("Classified {} limit signal(s): {:?}", signals.len(), signals);
    }
    signals
}

/// Deadline candidate for one kind while a payload is being inspected
#[derive(Debug, Clone, Copy)]
struct Candidate {
    reset_at: u64,
    is_absolute: bool,
}

#[derive(Debug, Default)]
struct Extraction {
    rate: Option<Candidate>,
    token: Option<Candidate>,
    remaining: Option<u64>,
}

impl Extraction {
    fn slot(&mut self, kind: LimitKind) -> &mut Option<Candidate> {
        match kind {
            LimitKind::Rate => &mut self.rate,
            LimitKind::Token => &mut self.token,
        }
    }

    /// Structured deadlines: a later absolute one replaces an earlier one.
    fn offer_absolute(&mut self, kind: LimitKind, reset_at: u64) {
        let slot = self.slot(kind);
        match *slot {
            Some(existing) if existing.is_absolute && existing.reset_at >= reset_at => {}
            _ => {
                *slot = Some(Candidate {
                    reset_at,
                    is_absolute: true,
                })
            }
        }
    }

    /// Heuristic deadlines only fill an empty slot.
    fn offer_heuristic(&mut self, kind: LimitKind, reset_at: u64) {
        let slot = self.slot(kind);
        if slot.is_none() {
            *slot = Some(Candidate {
                reset_at,
                is_absolute: false,
            });
        }
    }

    fn scan_text(&mut self, text: &str, now: u64) {
        if let Some(secs) = capture_number(&TRY_AGAIN_RE, text) {
            self.offer_heuristic(LimitKind::Rate, now.saturating_add(secs.saturating_mul(1000)));
        }
        if self.remaining.is_none() {
            self.remaining = capture_number(&REMAINING_RE, text);
        }
        if let Some(hours) = capture_number(&RESETS_IN_RE, text) {
            self.offer_heuristic(LimitKind::Token, now.saturating_add(hours.saturating_mul(3_600_000)));
        }
    }

    fn into_signals(self, now: u64, min_future_ms: u64) -> Vec<LimitSignal> {
        let mut signals = Vec::new();
        if let Some(rate) = self.rate {
            signals.push(to_signal(LimitKind::Rate, rate).clamped(now, min_future_ms));
        }
        if let Some(token) = self.token {
            signals.push(
                to_signal(LimitKind::Token, token)
                    .with_remaining(self.remaining)
                    .clamped(now, min_future_ms),
            );
        }
        signals
    }
}

fn to_signal(kind: LimitKind, candidate: Candidate) -> LimitSignal {
    if candidate.is_absolute {
        LimitSignal::absolute(kind, candidate.reset_at)
    } else {
        LimitSignal::heuristic(kind, candidate.reset_at)
    }
}

/// Limit kind named by a GraphQL error's code, read from `extensions.code` or `code`.
fn error_code(entry: &Value) -> Option<LimitKind> {
    let code = entry
        .get("extensions")
        .and_then(|ext| ext.get("code"))
        .and_then(Value::as_str)
        .or_else(|| entry.get("code").and_then(Value::as_str))?;

    match code {
        RATE_LIMITED_CODE => Some(LimitKind::Rate),
        TOKEN_BUDGET_EXCEEDED_CODE => Some(LimitKind::Token),
        _ => None,
    }
}

/// Finite number from a JSON number or numeric string.
fn to_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

/// Reset timestamp in epoch milliseconds, scaling epoch seconds up.
fn to_epoch_ms(value: &Value) -> Option<u64> {
    let raw = to_number(value).filter(|v| *v > 0.0)?;
    let ms = if raw < EPOCH_MS_THRESHOLD { raw * 1000.0 } else { raw };
    Some(ms.round() as u64)
}

fn to_count(value: &Value) -> Option<u64> {
    to_number(value).filter(|v| *v >= 0.0).map(|v| v.floor() as u64)
}

fn capture_number(re: &Regex, text: &str) -> Option<u64> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
}

/// HTTP status on `networkError.statusCode`, falling back to `networkError.status`.
fn transport_status(err: &Value) -> Option<u64> {
    let network = err.get("networkError")?;
    ["statusCode", "status"]
        .iter()
        .filter_map(|field| network.get(*field).and_then(to_number))
        .map(|status| status as u64)
        .find(|status| *status != 0)
}

/// `retry-after` header value in whole seconds, looked up case-insensitively.
fn retry_after_secs(err: &Value) -> Option<u64> {
    let headers = err
        .get("networkError")?
        .get("response")?
        .get("headers")?
        .as_object()?;

    let value = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
        .map(|(_, value)| value)?;

    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite() && *v >= 0.0).map(|v| v as u64),
        Value::String(s) => leading_integer(s),
        _ => None,
    }
}

/// Parse the leading run of digits, ignoring surrounding whitespace.
fn leading_integer(text: &str) -> Option<u64> {
    let digits: String = text.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
