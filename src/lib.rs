//! Chatgate - client-side rate-limit and token-budget gating for chat clients
//!
//! Chatgate turns the errors a chat backend returns into per-session rate and
//! token deadlines, gates sends on them, and exposes live countdowns.

pub mod chat;
pub mod error;
pub mod format;
pub mod limits;
pub mod transport;

pub use error::{ChatgateError, Result};
