//! Agora - command-line client for the campus portal API
//!
//! Main entry point for the Agora CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod client;
mod commands;

use commands::{auth, can, config, request};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Agora - command-line client for the campus portal API
#[derive(Parser)]
#[command(name = "agora")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Server URL (default: from config, else http://localhost:8080)
    #[arg(long, global = true, env = "AGORA_SERVER_URL")]
    pub server: Option<String>,

    /// Config directory (holds config.toml, tokens.json and logs)
    #[arg(long, global = true, env = "AGORA_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Authentication management
    Auth(auth::AuthArgs),

    /// Send an authenticated request
    Request(request::RequestArgs),

    /// Check permissions of the cached session
    Can(can::CanArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_dir = match cli.config_dir.clone().or_else(agora_config::config_dir) {
        Some(dir) => dir,
        None => PathBuf::from(".agora"),
    };

    // Initialize tracing: console (human-readable) + rotating JSON file
    let filter = if cli.verbose {
        "agora=debug,agora_client=debug,agora_config=debug,info"
    } else {
        "agora=info,agora_client=info,warn"
    };

    let log_dir = config_dir.join("logs");
    let file_appender = tracing_appender::rolling::daily(&log_dir, "agora.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "agora=trace,agora_client=trace,agora_config=trace,info",
                )),
        )
        .init();

    let loaded = agora_config::load_config_with_options(None, Some(&config_dir))?;
    for warning in &loaded.warnings {
        tracing::warn!("{}", warning);
    }

    let ctx = commands::Context::new(loaded, config_dir, cli.server, cli.json, cli.verbose);

    // Dispatch to command handlers
    match cli.command {
        Commands::Auth(args) => auth::run(args, &ctx).await,
        Commands::Request(args) => request::run(args, &ctx).await,
        Commands::Can(args) => can::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}
