//! Chat orchestration
//!
//! This module provides:
//! - The `ChatBackend` seam and its data types
//! - A scripted mock backend for tests
//! - The `ChatSession` orchestrator gating sends on the limit engine

pub mod backend;
pub mod session;
pub mod timers;

pub use backend::{
    BackendResult, ChatBackend, Conversation, Message, MockChatBackend, OperationError, Role,
    StartedConversation,
};
pub use session::{ChatSession, Operation, SessionConfig, SessionPhase};
pub use timers::{SessionTimers, TimerSlot};
