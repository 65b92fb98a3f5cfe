//! Error types for chatgate
//!
//! Centralized error handling using thiserror.

use std::sync::Arc;

use thiserror::Error;

use crate::chat::OperationError;

/// All error types that can occur in chatgate
#[derive(Debug, Error)]
pub enum ChatgateError {
    /// Request rate limit is active; nothing was sent
    #[error("Rate limited: try again in {seconds_left}s")]
    RateLimited { seconds_left: u64 },

    /// Token budget is exhausted; nothing was sent
    #[error("Token limited: budget resets in {seconds_left}s")]
    TokenLimited {
        seconds_left: u64,
        remaining: Option<u64>,
    },

    /// A message was sent with no conversation selected
    #[error("No conversation selected")]
    NoConversation,

    /// The session was shut down
    #[error("Chat session closed")]
    Closed,

    /// The backend rejected the operation; the original error is kept intact
    #[error("Backend error: {0}")]
    Backend(Arc<OperationError>),

    /// HTTP transport setup error
    #[error("Transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ChatgateError {
    /// True for the two gate rejections, which never reach the network
    pub fn is_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::TokenLimited { .. })
    }

    /// The backend error this wraps, if any
    pub fn operation_error(&self) -> Option<&Arc<OperationError>> {
        match self {
            Self::Backend(err) => Some(err),
            _ => None,
        }
    }
}

/// Result type alias for chatgate operations
pub type Result<T> = std::result::Result<T, ChatgateError>;
