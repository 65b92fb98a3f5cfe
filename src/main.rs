use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use serde_json::{Value, json};
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

mod cli;
mod config;

use chatgate::ChatgateError;
use chatgate::chat::ChatSession;
use chatgate::format::{format_duration, format_duration_seconds, format_seconds_to_time};
use chatgate::limits::{LimitState, LimitStatus, classify_with, now_ms};
use chatgate::transport::GraphqlBackend;
use cli::Cli;
use cli::commands::Commands;
use config::Config;

fn setup_logging() -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chatgate")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("chatgate.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Classify { input, json } => handle_classify_command(input, *json, config),
        Commands::Format { seconds } => handle_format_command(*seconds),
        Commands::Send { text, conversation } => handle_send_command(text, conversation.as_deref(), config).await,
    }
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut content = String::new();
        std::io::stdin()
            .read_to_string(&mut content)
            .context("Failed to read stdin")?;
        return Ok(content);
    }
    fs::read_to_string(input).context(format!("Failed to read {}", input))
}

fn handle_classify_command(input: &str, as_json: bool, config: &Config) -> Result<()> {
    let content = read_input(input)?;
    // Plain text is classified as a bare message
    let payload: Value = serde_json::from_str(&content).unwrap_or_else(|_| Value::String(content.trim().to_string()));

    let now = now_ms();
    let signals = classify_with(&payload, now, &config.limit_policy());
    info!("Classified {} signal(s) from {}", signals.len(), input);

    let mut state = LimitState::new();
    state.apply_signals(&signals, now);
    let status = LimitStatus::at(&state, now);

    if as_json {
        let out = json!({ "signals": signals, "status": status });
        println!("{}", serde_json::to_string_pretty(&out).context("Failed to serialize status")?);
        return Ok(());
    }

    if signals.is_empty() {
        println!("{}", "No limit signals found".green());
        return Ok(());
    }

    for signal in &signals {
        let source = if signal.is_absolute { "absolute" } else { "heuristic" };
        let left = signal.reset_at.saturating_sub(now);
        print!("{} {} in {} ({})", "Signal:".cyan(), signal.kind, format_duration(left), source);
        if let Some(remaining) = signal.remaining {
            print!(", remaining {}", remaining);
        }
        println!();
    }
    print_notice(&status);
    Ok(())
}

fn handle_format_command(seconds: u64) -> Result<()> {
    println!("{:<12} {}", "duration:".cyan(), format_duration(seconds.saturating_mul(1000)));
    println!("{:<12} {}", "compact:".cyan(), format_duration_seconds(seconds));
    println!("{:<12} {}", "time:".cyan(), format_seconds_to_time(seconds));
    Ok(())
}

async fn handle_send_command(text: &str, conversation: Option<&str>, config: &Config) -> Result<()> {
    let backend = GraphqlBackend::new(config.graphql_config()).context("Failed to create GraphQL backend")?;
    info!("Using GraphQL endpoint {}", backend.endpoint());

    let session = ChatSession::new(Arc::new(backend), config.session_config());
    let result = match conversation {
        Some(id) => {
            session.switch_conversation(id);
            session.send_message(text).await.map(|message| {
                println!("{} {} ({})", "Sent:".green(), message.id, id);
            })
        }
        None => session.start_new_conversation(text).await.map(|conversation| {
            println!("{} {} \"{}\"", "Started:".green(), conversation.id, conversation.title);
        }),
    };

    let status = session.limits();
    session.shutdown();

    match result {
        Ok(()) => Ok(()),
        Err(err @ (ChatgateError::RateLimited { .. } | ChatgateError::TokenLimited { .. })) => {
            print_notice(&status);
            Err(err).context("Send blocked")
        }
        Err(err) => {
            println!("{} {}", "Failed:".red(), err);
            print_notice(&status);
            Err(err).context("Send failed")
        }
    }
}

fn print_notice(status: &LimitStatus) {
    for line in status.notice_lines() {
        println!("{}", line.yellow());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging first
    setup_logging().context("Failed to setup logging")?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
