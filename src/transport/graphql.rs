//! GraphQL chat backend
//!
//! Implements `ChatBackend` over HTTP. Every failure is shaped into the error
//! payload the limit classifier reads: transport and HTTP failures land under
//! `networkError`, resolver failures under `graphQLErrors`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::{Value, json};

use crate::chat::{BackendResult, ChatBackend, Conversation, Message, OperationError, Role, StartedConversation};
use crate::error::{ChatgateError, Result};

/// Default GraphQL endpoint
pub const DEFAULT_ENDPOINT: &str = "http://localhost:4000/graphql";

/// Environment variable holding the bearer token
pub const DEFAULT_TOKEN_ENV: &str = "CHATGATE_TOKEN";

/// Longest conversation title derived from the first message
const TITLE_MAX_CHARS: usize = 50;

const SEND_MESSAGE: &str = r#"
mutation sendMessage($conversationId: ID!, $content: String!) {
    sendMessage(conversationId: $conversationId, content: $content) {
        id
        content
        role
        conversationId
        createdAt
    }
}"#;

const START_CONVERSATION: &str = r#"
mutation startConversation($content: String!) {
    startConversation(content: $content) {
        id
        content
        role
        conversationId
        createdAt
    }
}"#;

const GET_MESSAGES: &str = r#"
query GetMessages($conversationId: ID!) {
    messages(conversationId: $conversationId) {
        edges {
            node {
                id
                content
                role
                createdAt
            }
        }
    }
}"#;

const GET_CONVERSATIONS: &str = r#"
query GetConversations {
    conversations {
        id
        title
        summary
        createdAt
        updatedAt
        lastMessageAt
    }
}"#;

/// Configuration for the GraphQL backend
#[derive(Debug, Clone)]
pub struct GraphqlConfig {
    pub endpoint: String,
    /// Environment variable read for the bearer token; unset means anonymous
    pub token_env: String,
    pub timeout: Duration,
}

impl Default for GraphqlConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            token_env: DEFAULT_TOKEN_ENV.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// GraphQL chat backend
pub struct GraphqlBackend {
    client: Client,
    token: Option<String>,
    config: GraphqlConfig,
}

impl GraphqlBackend {
    /// Create a backend, reading the token from `config.token_env`
    pub fn new(config: GraphqlConfig) -> Result<Self> {
        let token = std::env::var(&config.token_env).ok().filter(|t| !t.is_empty());
        if token.is_none() {
            log::debug!("{} not set; sending requests without authorization", config.token_env);
        }
        Self::with_token(token, config)
    }

    pub fn with_token(token: Option<String>, config: GraphqlConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ChatgateError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, token, config })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    /// Run one operation and return its `data` object
    async fn execute(&self, query: &str, variables: Value) -> BackendResult<Value> {
        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header("content-type", "application/json")
            .json(&json!({ "query": query, "variables": variables }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| network_error(&e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|h| h.to_str().ok())
                .map(str::to_string);
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), retry_after.as_deref(), &body));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| network_error(&format!("Failed to parse response: {}", e)))?;
        into_data(body)
    }
}

#[async_trait]
impl ChatBackend for GraphqlBackend {
    async fn send_message(&self, conversation_id: &str, content: &str) -> BackendResult<Message> {
        let data = self
            .execute(SEND_MESSAGE, json!({ "conversationId": conversation_id, "content": content }))
            .await?;
        field(data, "sendMessage")
    }

    async fn start_conversation(&self, content: &str) -> BackendResult<StartedConversation> {
        let sent_at = Utc::now();
        let data = self.execute(START_CONVERSATION, json!({ "content": content })).await?;
        let reply: Message = field(data, "startConversation")?;
        Ok(started_from_reply(reply, content, sent_at))
    }

    async fn fetch_messages(&self, conversation_id: &str) -> BackendResult<Vec<Message>> {
        let data = self
            .execute(GET_MESSAGES, json!({ "conversationId": conversation_id }))
            .await?;
        parse_message_edges(&data)
    }

    async fn fetch_conversations(&self) -> BackendResult<Vec<Conversation>> {
        let data = self.execute(GET_CONVERSATIONS, json!({})).await?;
        field(data, "conversations")
    }
}

impl std::fmt::Debug for GraphqlBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphqlBackend")
            .field("endpoint", &self.config.endpoint)
            .field("authorized", &self.token.is_some())
            .finish()
    }
}

/// Failure before any HTTP status was received.
fn network_error(message: &str) -> OperationError {
    OperationError::new(json!({
        "message": message,
        "networkError": { "message": message }
    }))
}

/// Non-success HTTP status, keeping `retry-after` where the classifier looks for it.
fn status_error(status: u16, retry_after: Option<&str>, body: &str) -> OperationError {
    let message = if body.trim().is_empty() {
        format!("Response not successful: Received status code {}", status)
    } else {
        format!("Response not successful: Received status code {}: {}", status, body.trim())
    };

    let mut network = json!({ "statusCode": status, "message": message });
    if let Some(retry_after) = retry_after {
        network["response"] = json!({ "headers": { "retry-after": retry_after } });
    }
    OperationError::new(json!({ "message": message, "networkError": network }))
}

/// Split a GraphQL response into its data or its errors.
fn into_data(mut body: Value) -> BackendResult<Value> {
    if let Some(errors) = body.get("errors").and_then(Value::as_array).filter(|e| !e.is_empty()) {
        let message = errors[0]
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("GraphQL error")
            .to_string();
        log::debug!("GraphQL errors: {}", message);
        return Err(OperationError::new(json!({
            "message": message,
            "graphQLErrors": errors,
        })));
    }

    match body.get_mut("data").map(Value::take) {
        Some(data) if !data.is_null() => Ok(data),
        _ => Err(network_error("Response contained no data")),
    }
}

fn field<T: serde::de::DeserializeOwned>(mut data: Value, name: &str) -> BackendResult<T> {
    let value = data.get_mut(name).map(Value::take).unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|e| network_error(&format!("Malformed {}: {}", name, e)))
}

fn parse_message_edges(data: &Value) -> BackendResult<Vec<Message>> {
    let Some(edges) = data.pointer("/messages/edges").and_then(Value::as_array) else {
        return Err(network_error("Malformed messages: missing edges"));
    };

    edges
        .iter()
        .map(|edge| {
            let node = edge.get("node").cloned().unwrap_or(Value::Null);
            serde_json::from_value(node).map_err(|e| network_error(&format!("Malformed message: {}", e)))
        })
        .collect()
}

/// Title from the first message: its first 50 characters, `...` when cut.
pub fn conversation_title(content: &str) -> String {
    let mut title: String = content.chars().take(TITLE_MAX_CHARS).collect();
    if content.chars().count() > TITLE_MAX_CHARS {
        title.push_str("...");
    }
    title
}

/// The conversation a `startConversation` reply belongs to.
///
/// Uses the reply's `conversationId`; otherwise the reply id up to its first `-`.
pub fn conversation_from_first_message(message: &Message, content: &str) -> Conversation {
    let id = message
        .conversation_id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| match message.id.split('-').next() {
            Some(prefix) if !prefix.is_empty() => prefix.to_string(),
            _ => message.id.clone(),
        });

    Conversation {
        id,
        title: conversation_title(content),
        summary: None,
        created_at: message.created_at,
        updated_at: Some(message.created_at),
        last_message_at: Some(message.created_at),
    }
}

/// Seed a started conversation with the user's message and the reply.
///
/// The mutation only returns the reply, so the user's message is rebuilt
/// locally, stamped with the time the request went out.
pub fn started_from_reply(mut reply: Message, content: &str, sent_at: DateTime<Utc>) -> StartedConversation {
    let conversation = conversation_from_first_message(&reply, content);
    if reply.conversation_id.is_none() {
        reply.conversation_id = Some(conversation.id.clone());
    }

    let mut first = Message::new(
        format!("user-{}", sent_at.timestamp_millis()),
        Role::User,
        content,
        sent_at,
    );
    first.conversation_id = Some(conversation.id.clone());

    StartedConversation {
        conversation,
        messages: vec![first, reply],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crate::limits::{LimitKind, classify};

    const NOW: u64 = 1_700_000_000_000;

    fn reply(id: &str, conversation_id: Option<&str>) -> Message {
        serde_json::from_value(json!({
            "id": id,
            "content": "Hi! How can I help?",
            "role": "assistant",
            "conversationId": conversation_id,
            "createdAt": "2024-01-15T10:30:15Z"
        }))
        .unwrap()
    }

    #[test]
    fn test_config_default() {
        let config = GraphqlConfig::default();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.token_env, DEFAULT_TOKEN_ENV);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_backend_with_token() {
        let backend = GraphqlBackend::with_token(Some("t0k3n".to_string()), GraphqlConfig::default()).unwrap();
        assert_eq!(backend.endpoint(), DEFAULT_ENDPOINT);
        assert!(format!("{:?}", backend).contains("authorized: true"));
    }

    #[test]
    fn test_status_429_is_classified() {
        let err = status_error(429, Some("12"), "");
        let signals = classify(err.payload(), NOW);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, LimitKind::Rate);
        assert_eq!(signals[0].reset_at, NOW + 12_000);
    }

    #[test]
    fn test_status_429_without_retry_after_uses_default() {
        let err = status_error(429, None, "slow down");
        assert!(err.message().unwrap().contains("slow down"));
        let signals = classify(err.payload(), NOW);
        assert_eq!(signals[0].reset_at, NOW + 30_000);
    }

    #[test]
    fn test_status_500_is_not_a_limit() {
        let err = status_error(500, None, "");
        assert_eq!(err.payload()["networkError"]["statusCode"], 500);
        assert!(classify(err.payload(), NOW).is_empty());
    }

    #[test]
    fn test_graphql_errors_keep_extensions() {
        let body = json!({
            "data": null,
            "errors": [{
                "message": "Daily token budget exceeded",
                "extensions": { "code": "TOKEN_BUDGET_EXCEEDED", "resetTime": NOW + 60_000, "remaining": 0 }
            }]
        });

        let err = into_data(body).unwrap_err();
        assert_eq!(err.message(), Some("Daily token budget exceeded"));

        let signals = classify(err.payload(), NOW);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, LimitKind::Token);
        assert!(signals[0].is_absolute);
        assert_eq!(signals[0].remaining, Some(0));
    }

    #[test]
    fn test_into_data_success() {
        let data = into_data(json!({ "data": { "conversations": [] } })).unwrap();
        assert!(data["conversations"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_into_data_missing_data() {
        assert!(into_data(json!({})).is_err());
        assert!(into_data(json!({ "data": null, "errors": [] })).is_err());
    }

    #[test]
    fn test_parse_message_edges() {
        let data = json!({
            "messages": { "edges": [
                { "node": { "id": "m1", "content": "Hello", "role": "user", "createdAt": "2024-01-15T10:30:00Z" } },
                { "node": { "id": "m2", "content": "Hi!", "role": "assistant", "createdAt": "2024-01-15T10:30:15Z" } }
            ]}
        });

        let messages = parse_message_edges(&data).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Assistant);
    }

    #[test]
    fn test_parse_message_edges_malformed() {
        assert!(parse_message_edges(&json!({ "messages": null })).is_err());
        assert!(parse_message_edges(&json!({ "messages": { "edges": [{ "node": { "id": "m1" } }] } })).is_err());
    }

    #[test]
    fn test_field_deserializes_conversations() {
        let data = json!({ "conversations": [
            { "id": "c1", "title": "Loading Dock Help", "createdAt": "2024-01-15T10:30:00Z" }
        ]});
        let conversations: Vec<Conversation> = field(data, "conversations").unwrap();
        assert_eq!(conversations[0].id, "c1");
    }

    #[test]
    fn test_conversation_title_truncates() {
        assert_eq!(conversation_title("Short question"), "Short question");

        let long = "a".repeat(60);
        let title = conversation_title(&long);
        assert_eq!(title, format!("{}...", "a".repeat(50)));

        assert_eq!(conversation_title(&"b".repeat(50)), "b".repeat(50));
    }

    #[test]
    fn test_conversation_id_from_reply() {
        let conversation = conversation_from_first_message(&reply("m9", Some("c42")), "Where is the dock?");
        assert_eq!(conversation.id, "c42");
        assert_eq!(conversation.title, "Where is the dock?");
        assert_eq!(conversation.last_message_at, Some(conversation.created_at));
    }

    #[test]
    fn test_conversation_id_from_reply_id_prefix() {
        let conversation = conversation_from_first_message(&reply("c42-m9", None), "hi");
        assert_eq!(conversation.id, "c42");

        let conversation = conversation_from_first_message(&reply("plain", None), "hi");
        assert_eq!(conversation.id, "plain");
    }

    #[test]
    fn test_started_from_reply_keeps_reply() {
        let sent_at = Utc.timestamp_millis_opt(1_705_314_600_000).unwrap();
        let started = started_from_reply(reply("c42-m9", None), "Where is the dock?", sent_at);

        assert_eq!(started.conversation.id, "c42");
        assert_eq!(started.messages.len(), 2);

        let first = &started.messages[0];
        assert_eq!(first.role, Role::User);
        assert_eq!(first.content, "Where is the dock?");
        assert_eq!(first.created_at, sent_at);
        assert_eq!(first.conversation_id.as_deref(), Some("c42"));

        let last = &started.messages[1];
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.id, "c42-m9");
        assert_eq!(last.conversation_id.as_deref(), Some("c42"));
    }
}
