//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - classify: extract limit signals from an error payload
//! - format: render a duration the way countdowns show it
//! - send: send one message through the GraphQL backend

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Chatgate - rate-limit and token-budget gating for chat clients
#[derive(Parser, Debug)]
#[command(name = "chatgate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify a backend error payload (JSON) into limit signals
    Classify {
        /// File holding the error JSON, or `-` for stdin
        input: String,

        /// Print the resulting status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Render a number of seconds the way countdowns display it
    Format {
        /// Duration in seconds
        seconds: u64,
    },

    /// Send one message through the GraphQL backend
    Send {
        /// Message text
        text: String,

        /// Conversation to post into; starts a new one when omitted
        #[arg(short = 'C', long)]
        conversation: Option<String>,
    },
}
