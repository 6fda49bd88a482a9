//! Diagnostics and Debug Logging
//!
//! Command-line interface, logging setup and replay metrics for
//! troubleshooting the chat sync engine.

use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use chatsync_protocol::StreamEvent;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// chatsync command-line interface
#[derive(Parser, Debug)]
#[command(name = "chatsync")]
#[command(about = "Debugging tool for the chat sync engine", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Set log level (error, warn, info, debug, trace); overrides the config file
    #[arg(short, long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Enable JSON structured logging
    #[arg(long)]
    pub json_logs: bool,

    /// Hide timestamps in logs
    #[arg(long)]
    pub no_timestamps: bool,

    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: DiagnosticCommand,
}

/// Diagnostic commands
#[derive(Subcommand, Debug)]
pub enum DiagnosticCommand {
    /// Show version and build information
    Version {
        /// Show detailed build information
        #[arg(long)]
        verbose: bool,
    },

    /// Show the effective configuration
    DumpConfig,

    /// Replay a recorded event stream through the stream processor
    Replay {
        /// Line-delimited event file (JSON lines or SSE `data:` lines)
        events: PathBuf,

        /// JSON array of messages served to stream recovery
        #[arg(short, long, value_name = "FILE")]
        messages: Option<PathBuf>,

        /// Conversation the replayed send targets
        #[arg(long, default_value = "replay")]
        conversation: String,

        /// Text of the replayed user message
        #[arg(long, default_value = "")]
        prompt: String,

        /// Feed the file in chunks of this many bytes (0 = whole file)
        #[arg(long, default_value = "0")]
        chunk_size: usize,
    },
}

impl Cli {
    /// Merge command-line logging flags over the configured defaults
    pub fn logging(&self, configured: &LoggingConfig) -> LoggingConfig {
        LoggingConfig {
            level: self
                .log_level
                .clone()
                .unwrap_or_else(|| configured.level.clone()),
            json: self.json_logs || configured.json,
            timestamps: configured.timestamps && !self.no_timestamps,
        }
    }
}

/// Initialize logging
pub fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let log_level = logging.level.parse::<Level>().with_context(|| {
        format!(
            "Invalid log level '{}'. Valid levels: error, warn, info, debug, trace",
            logging.level
        )
    })?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level.as_str()))
        .context("Failed to create log filter")?;

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(true)
        .with_line_number(true);

    match (logging.json, logging.timestamps) {
        (true, true) => subscriber.json().init(),
        (true, false) => subscriber.without_time().json().init(),
        (false, true) => subscriber.init(),
        (false, false) => subscriber.without_time().init(),
    }

    info!(
        "Logging initialized: level={}, json={}, timestamps={}",
        log_level, logging.json, logging.timestamps
    );

    Ok(())
}

/// Counters collected while replaying an event stream
#[derive(Debug, Default)]
pub struct ReplayMetrics {
    start_time: Option<Instant>,

    /// Events seen, by wire type
    events: BTreeMap<&'static str, u64>,

    /// Raw bytes fed to the decoder
    bytes_read: u64,

    /// Characters of streamed assistant content
    token_chars: u64,

    /// Lines that failed to decode
    decode_errors: u64,

    /// Message fetches made by recovery
    message_fetches: u64,
}

impl ReplayMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn record_bytes(&mut self, size: usize) {
        self.bytes_read += size as u64;
    }

    pub fn record_event(&mut self, event: &StreamEvent) {
        *self.events.entry(event.kind()).or_insert(0) += 1;
        if let StreamEvent::Token { content } = event {
            self.token_chars += content.chars().count() as u64;
        }
    }

    pub fn record_decode_error(&mut self) {
        self.decode_errors += 1;
    }

    pub fn record_message_fetch(&mut self) {
        self.message_fetches += 1;
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.start_time
            .map(|start| start.elapsed().as_millis())
            .unwrap_or(0)
    }

    pub fn total_events(&self) -> u64 {
        self.events.values().sum()
    }

    pub fn event_count(&self, kind: &str) -> u64 {
        self.events.get(kind).copied().unwrap_or(0)
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn token_chars(&self) -> u64 {
        self.token_chars
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors
    }

    pub fn message_fetches(&self) -> u64 {
        self.message_fetches
    }

    /// Display metrics summary
    pub fn display(&self) {
        println!("\n=== Replay Metrics ===");
        println!("Elapsed: {} ms", self.elapsed_ms());
        println!("Input: {}", format_bytes(self.bytes_read));
        println!("\nEvents: {}", self.total_events());
        for (kind, count) in &self.events {
            println!("  {}: {}", kind, count);
        }
        println!("  undecodable lines: {}", self.decode_errors);
        println!("\nStreamed characters: {}", self.token_chars);
        println!("Recovery fetches: {}", self.message_fetches);
        println!();
    }
}

/// Format bytes in human-readable form
fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit_index = 0;

    while value >= 1024.0 && unit_index < UNITS.len() - 1 {
        value /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit_index])
    }
}

/// Build information for diagnostics
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: Option<&'static str>,
    pub engine_version: &'static str,
}

impl BuildInfo {
    pub fn get() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            git_hash: option_env!("GIT_HASH"),
            engine_version: chatsync_protocol::VERSION,
        }
    }

    pub fn display(&self, verbose: bool) {
        println!("chatsync v{}", self.version);

        if verbose {
            if let Some(hash) = self.git_hash {
                println!("Git commit: {}", hash);
            }
            println!("Engine: chatsync-protocol v{}", self.engine_version);
            println!("Platform: {}", std::env::consts::OS);
            println!("Architecture: {}", std::env::consts::ARCH);
        }
    }
}
