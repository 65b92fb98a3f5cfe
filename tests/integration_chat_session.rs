//! Chat session integration tests
//!
//! Drives the public API end to end: classification, the limit state, the
//! countdown clock and the gated chat session over a mock backend.

use std::sync::Arc;
use std::time::Duration;

use chatgate::chat::{ChatSession, MockChatBackend, Operation, OperationError, SessionConfig};
use chatgate::error::{ChatgateError, Result};
use chatgate::limits::{
    LimitKind, LimitSignal, LimitState, LimitStatus, LimitTracker, SessionClock, classify, now_ms, seconds_until,
};
use serde_json::json;

const NOW: u64 = 1_700_000_000_000;

/// Absolute signals only ever push a deadline later
#[test]
fn test_absolute_signals_extend_monotonically() {
    let mut state = LimitState::new();
    for offset in [5_000, 12_000, 8_000, 3_000] {
        state.apply_signal(&LimitSignal::absolute(LimitKind::Rate, NOW + offset));
    }
    assert_eq!(state.rate_reset_at, Some(NOW + 12_000));
}

/// Heuristic signals never move an existing deadline
#[test]
fn test_heuristics_do_not_regress() {
    let mut state = LimitState::new();
    state.apply_signal(&LimitSignal::absolute(LimitKind::Token, NOW + 60_000));
    state.apply_signal(&LimitSignal::heuristic(LimitKind::Token, NOW + 5_000));
    state.apply_signal(&LimitSignal::heuristic(LimitKind::Token, NOW + 600_000));
    assert_eq!(state.token_reset_at, Some(NOW + 60_000));
}

#[test]
fn test_limit_expires_on_tick() {
    let mut state = LimitState::new();
    state.apply_signal(&LimitSignal::absolute(LimitKind::Rate, NOW + 1_000));

    assert!(state.tick(NOW + 1_001));
    assert_eq!(state.rate_reset_at, None);
    assert!(!LimitStatus::at(&state, NOW + 1_001).is_rate_limited);
}

#[test]
fn test_same_error_applied_twice_is_idempotent() {
    let mut tracker = LimitTracker::default();
    let err = Arc::new(OperationError::from_message("Rate limit exceeded, try again in 5 seconds"));

    tracker.ingest(&err, NOW);
    let once = *tracker.state();
    tracker.ingest(&err, NOW + 2_000);
    assert_eq!(*tracker.state(), once);

    // A distinct error with the same content is a new observation
    let again = Arc::new(OperationError::from_message("Rate limit exceeded, try again in 5 seconds"));
    tracker.ingest(&again, NOW + 2_000);
    assert_eq!(tracker.state().rate_reset_at, once.rate_reset_at);
}

#[test]
fn test_seconds_rounding() {
    assert_eq!(seconds_until(Some(NOW + 1_500), NOW), 2);
    assert_eq!(seconds_until(Some(NOW + 999), NOW), 1);
}

#[test]
fn test_structured_rate_scenario() {
    let now = now_ms();
    let err = json!({
        "graphQLErrors": [{ "extensions": { "code": "RATE_LIMITED", "resetTime": now / 1000 + 10 } }]
    });

    let mut state = LimitState::new();
    state.apply_signals(&classify(&err, now), now);
    let status = LimitStatus::at(&state, now);

    assert!(status.is_rate_limited);
    assert!((9..=11).contains(&status.rate_seconds_left));
}

#[test]
fn test_free_text_rate_scenario() {
    let err = json!({ "message": "Rate limit exceeded, try again in 5 seconds" });

    let mut state = LimitState::new();
    state.apply_signals(&classify(&err, NOW), NOW);
    assert_eq!(LimitStatus::at(&state, NOW).rate_seconds_left, 5);
}

#[test]
fn test_token_budget_scenario() {
    let err = json!({ "message": "Daily token budget exceeded · Remaining: 120 tokens. Resets in 2 hours." });

    let mut state = LimitState::new();
    state.apply_signals(&classify(&err, NOW), NOW);
    let status = LimitStatus::at(&state, NOW);

    assert!(status.is_token_limited);
    assert!(!status.is_rate_limited);
    assert_eq!(status.token_remaining, Some(120));
    assert_eq!(status.token_seconds_left, 7_200);
}

/// A closed gate rejects before the backend is touched
#[tokio::test(start_paused = true)]
async fn test_gate_blocks_send() {
    let mock = Arc::new(MockChatBackend::new());
    let session = ChatSession::new(mock.clone(), SessionConfig::default()).with_conversation("c1");

    mock.push_send_result(Err(OperationError::from_message(
        "Rate limit exceeded, try again in 5 seconds",
    )));
    assert!(session.send_message("first").await.is_err());
    assert_eq!(mock.send_calls(), 1);

    let err = session.send_message("second").await.unwrap_err();
    assert!(matches!(err, ChatgateError::RateLimited { seconds_left: 5 }));
    assert_eq!(mock.send_calls(), 1);
}

/// The countdown reaches zero, the gate reopens and sending works again
#[tokio::test(start_paused = true)]
async fn test_gate_reopens_after_countdown() -> Result<()> {
    let mock = Arc::new(MockChatBackend::new());
    let session = ChatSession::with_clock(mock.clone(), SessionConfig::default(), SessionClock::anchored_at(NOW))
        .with_conversation("c1");
    let mut rx = session.subscribe_limits();

    session.apply_rate_limit(3);
    assert_eq!(rx.borrow_and_update().rate_seconds_left, 3);
    assert!(session.send_message("blocked").await.unwrap_err().is_limit());

    let mut seen = Vec::new();
    while rx.changed().await.is_ok() {
        let status = rx.borrow_and_update().clone();
        seen.push(status.rate_seconds_left);
        if !status.is_rate_limited {
            break;
        }
    }
    assert_eq!(seen, vec![2, 1, 0]);
    assert!(!session.is_ticking());

    session.send_message("allowed").await?;
    assert_eq!(mock.send_calls(), 1);
    Ok(())
}

/// Held errors are reported first-failure-wins across operations
#[tokio::test(start_paused = true)]
async fn test_last_error_precedence() {
    let mock = Arc::new(MockChatBackend::new());
    mock.push_send_result(Err(OperationError::from_message("send broke")));
    mock.push_fetch_messages_result(Err(OperationError::from_message("fetch broke")));
    let session = ChatSession::new(mock.clone(), SessionConfig::default()).with_conversation("c1");

    let _ = session.send_message("hi").await;
    assert_eq!(session.last_error().unwrap().message(), Some("send broke"));

    let _ = session.refresh_messages().await;
    assert_eq!(session.last_error().unwrap().message(), Some("fetch broke"));
    assert!(session.error_for(Operation::SendMessage).is_some());
}

/// A token budget error on start blocks later sends with the remaining count
#[tokio::test(start_paused = true)]
async fn test_token_budget_from_structured_start_failure() {
    let mock = Arc::new(MockChatBackend::new());
    mock.push_start_result(Err(OperationError::new(json!({
        "message": "Daily token budget exceeded",
        "graphQLErrors": [{
            "message": "Daily token budget exceeded",
            "extensions": { "code": "TOKEN_BUDGET_EXCEEDED", "resetTime": NOW + 3_600_000, "remaining": 0 }
        }]
    }))));
    let session = ChatSession::with_clock(mock.clone(), SessionConfig::default(), SessionClock::anchored_at(NOW));

    assert!(session.start_new_conversation("hello").await.is_err());
    assert_eq!(session.current_conversation(), None);

    session.switch_conversation("c1");
    match session.send_message("anyone?").await {
        Err(ChatgateError::TokenLimited { seconds_left, remaining }) => {
            assert_eq!(seconds_left, 3_600);
            assert_eq!(remaining, Some(0));
        }
        other => panic!("expected token limit, got {:?}", other.map(|m| m.id)),
    }
    assert_eq!(mock.send_calls(), 0);

    let lines = session.limits().notice_lines();
    assert_eq!(lines[0], "You're out of token budget. Reset in 1h 00m 00s.");
    assert_eq!(lines[1], "Remaining tokens: 0");
}

/// Dropping the session stops every background task
#[tokio::test(start_paused = true)]
async fn test_drop_stops_background_work() {
    let mock = Arc::new(MockChatBackend::new());
    {
        let session = ChatSession::new(mock.clone(), SessionConfig::default()).with_conversation("c1");
        session.send_message("hi").await.unwrap();
        session.apply_rate_limit(30);
    }

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(mock.fetch_messages_calls(), 0);
}
