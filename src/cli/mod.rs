//! CLI module for chatgate - command-line interface and subcommands.
//!
//! Provides subcommands for classifying error payloads, rendering durations,
//! and sending a message through the gated GraphQL backend.

pub mod commands;

pub use commands::Cli;
