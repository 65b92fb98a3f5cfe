//! Chat backend seam and data types
//!
//! The session talks to the network only through `ChatBackend`. Failures come
//! back as `OperationError`, an opaque JSON payload whose shape is decided by
//! whichever transport produced it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// A rejected backend operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationError {
    payload: Value,
}

impl OperationError {
    /// Wrap a raw error payload.
    pub fn new(payload: Value) -> Self {
        Self { payload }
    }

    /// Error carrying only a top-level message.
    pub fn from_message(message: impl Into<String>) -> Self {
        Self::new(json!({ "message": message.into() }))
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn message(&self) -> Option<&str> {
        match &self.payload {
            Value::String(text) => Some(text),
            other => other.get("message").and_then(Value::as_str),
        }
    }
}

impl std::fmt::Display for OperationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.message() {
            Some(message) => write!(f, "{}", message),
            None => write!(f, "{}", self.payload),
        }
    }
}

impl std::error::Error for OperationError {}

pub type BackendResult<T> = std::result::Result<T, OperationError>;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub role: Role,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl Message {
    pub fn new(id: impl Into<String>, role: Role, content: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            role,
            created_at,
            conversation_id: None,
        }
    }

    /// Creation time in epoch milliseconds.
    pub fn created_at_ms(&self) -> u64 {
        self.created_at.timestamp_millis().max(0) as u64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
}

/// A newly started conversation with its opening messages, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct StartedConversation {
    pub conversation: Conversation,
    /// The user's first message and the assistant's reply, when there is one
    pub messages: Vec<Message>,
}

/// Network operations the chat session depends on
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Post a user message to an existing conversation
    async fn send_message(&self, conversation_id: &str, content: &str) -> BackendResult<Message>;

    /// Start a conversation whose first user message is `content`
    async fn start_conversation(&self, content: &str) -> BackendResult<StartedConversation>;

    /// Messages of one conversation, oldest first
    async fn fetch_messages(&self, conversation_id: &str) -> BackendResult<Vec<Message>>;

    /// The caller's conversations
    async fn fetch_conversations(&self) -> BackendResult<Vec<Conversation>>;
}

/// Scripted in-memory backend for tests.
///
/// Queued results are returned in order; once a queue is empty the backend
/// succeeds with a plausible default.
#[derive(Debug, Default)]
pub struct MockChatBackend {
    send_results: Mutex<VecDeque<BackendResult<Message>>>,
    start_results: Mutex<VecDeque<BackendResult<StartedConversation>>>,
    fetch_messages_results: Mutex<VecDeque<BackendResult<Vec<Message>>>>,
    messages: Mutex<Vec<Message>>,
    conversations: Mutex<Vec<Conversation>>,
    send_delay: Mutex<Duration>,
    fetch_delay: Mutex<Duration>,
    send_calls: AtomicUsize,
    start_calls: AtomicUsize,
    fetch_messages_calls: AtomicUsize,
    fetch_conversations_calls: AtomicUsize,
}

impl MockChatBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_send_result(&self, result: BackendResult<Message>) {
        lock(&self.send_results).push_back(result);
    }

    pub fn push_start_result(&self, result: BackendResult<StartedConversation>) {
        lock(&self.start_results).push_back(result);
    }

    pub fn push_fetch_messages_result(&self, result: BackendResult<Vec<Message>>) {
        lock(&self.fetch_messages_results).push_back(result);
    }

    /// Messages returned by `fetch_messages` when nothing is queued.
    pub fn set_messages(&self, messages: Vec<Message>) {
        *lock(&self.messages) = messages;
    }

    pub fn set_conversations(&self, conversations: Vec<Conversation>) {
        *lock(&self.conversations) = conversations;
    }

    /// Hold every send (and start) in flight for `delay`.
    pub fn set_send_delay(&self, delay: Duration) {
        *lock(&self.send_delay) = delay;
    }

    /// Hold every fetch in flight for `delay`.
    pub fn set_fetch_delay(&self, delay: Duration) {
        *lock(&self.fetch_delay) = delay;
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_messages_calls(&self) -> usize {
        self.fetch_messages_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_conversations_calls(&self) -> usize {
        self.fetch_conversations_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatBackend for MockChatBackend {
    async fn send_message(&self, conversation_id: &str, content: &str) -> BackendResult<Message> {
        let n = self.send_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.send_delay);
        hold(delay).await;
        lock(&self.send_results).pop_front().unwrap_or_else(|| {
            let mut message = Message::new(format!("msg-{}", n + 1), Role::User, content, Utc::now());
            message.conversation_id = Some(conversation_id.to_string());
            Ok(message)
        })
    }

    /// Unscripted starts echo only the user's message, with no reply yet.
    async fn start_conversation(&self, content: &str) -> BackendResult<StartedConversation> {
        let n = self.start_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.send_delay);
        hold(delay).await;
        lock(&self.start_results).pop_front().unwrap_or_else(|| {
            let id = format!("conv-{}", n + 1);
            let mut first = Message::new(format!("{}-user", id), Role::User, content, Utc::now());
            first.conversation_id = Some(id.clone());
            Ok(StartedConversation {
                conversation: Conversation {
                    id,
                    title: content.chars().take(50).collect(),
                    summary: None,
                    created_at: first.created_at,
                    updated_at: None,
                    last_message_at: None,
                },
                messages: vec![first],
            })
        })
    }

    async fn fetch_messages(&self, _conversation_id: &str) -> BackendResult<Vec<Message>> {
        self.fetch_messages_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.fetch_delay);
        hold(delay).await;
        lock(&self.fetch_messages_results)
            .pop_front()
            .unwrap_or_else(|| Ok(lock(&self.messages).clone()))
    }

    async fn fetch_conversations(&self) -> BackendResult<Vec<Conversation>> {
        self.fetch_conversations_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.fetch_delay);
        hold(delay).await;
        Ok(lock(&self.conversations).clone())
    }
}

async fn hold(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_error_message() {
        let err = OperationError::from_message("try again in 5 seconds");
        assert_eq!(err.message(), Some("try again in 5 seconds"));
        assert_eq!(err.to_string(), "try again in 5 seconds");
    }

    #[test]
    fn test_operation_error_without_message_displays_payload() {
        let err = OperationError::new(json!({ "networkError": { "statusCode": 502 } }));
        assert_eq!(err.message(), None);
        assert!(err.to_string().contains("502"));
    }

    #[test]
    fn test_message_deserialize() {
        let message: Message = serde_json::from_value(json!({
            "id": "m1",
            "content": "Hello",
            "role": "assistant",
            "createdAt": "2024-01-15T10:30:15Z",
            "conversationId": "c1"
        }))
        .unwrap();

        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.conversation_id.as_deref(), Some("c1"));
        assert_eq!(message.created_at_ms(), 1_705_314_615_000);
    }

    #[test]
    fn test_message_role_defaults_to_user() {
        let message: Message = serde_json::from_value(json!({
            "id": "m1",
            "content": "Hi",
            "createdAt": "2024-01-15T10:30:00Z"
        }))
        .unwrap();
        assert_eq!(message.role, Role::User);
    }

    #[test]
    fn test_conversation_deserialize() {
        let conversation: Conversation = serde_json::from_value(json!({
            "id": "c1",
            "title": "Loading Dock Help",
            "summary": null,
            "createdAt": "2024-01-15T10:30:00Z",
            "updatedAt": "2024-01-15T10:30:15Z"
        }))
        .unwrap();
        assert_eq!(conversation.title, "Loading Dock Help");
        assert!(conversation.updated_at.is_some());
        assert!(conversation.last_message_at.is_none());
    }

    #[tokio::test]
    async fn test_mock_backend_scripted_then_default() {
        let mock = MockChatBackend::new();
        mock.push_send_result(Err(OperationError::from_message("nope")));

        assert!(mock.send_message("c1", "hi").await.is_err());
        let message = mock.send_message("c1", "hi again").await.unwrap();
        assert_eq!(message.content, "hi again");
        assert_eq!(mock.send_calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_backend_default_conversation() {
        let mock = MockChatBackend::new();
        let started = mock.start_conversation("Where is the loading dock?").await.unwrap();
        assert_eq!(started.conversation.id, "conv-1");
        assert_eq!(started.messages.len(), 1);
        assert_eq!(started.messages[0].role, Role::User);
        assert_eq!(started.messages[0].conversation_id.as_deref(), Some("conv-1"));
        assert_eq!(mock.start_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_backend_send_delay() {
        let mock = MockChatBackend::new();
        mock.set_send_delay(Duration::from_secs(3));

        let started = tokio::time::Instant::now();
        mock.send_message("c1", "slow").await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(3));
    }
}
