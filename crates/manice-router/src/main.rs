//! Manice Router - standalone HTTP server
//!
//! # Usage
//!
//! ```bash
//! # Defaults, manice.toml and MANICE_* variables
//! manice-router
//!
//! # Explicit file, LM Studio backend, debug logging
//! manice-router --config ./manice.toml --provider lm_studio -vv
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use manice_router::{Config, Server};

/// Manice - Excel AI CoPilot backend
#[derive(Parser, Debug)]
#[command(name = "manice-router", version, about = "Manice Router - local model routing for Excel")]
struct Cli {
    /// Configuration file (TOML); defaults to ./manice.toml when present
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind host
    #[arg(long)]
    host: Option<String>,

    /// Bind port
    #[arg(short, long)]
    port: Option<u16>,

    /// Preferred provider (ollama, lm_studio, jan)
    #[arg(long)]
    provider: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(provider) = cli.provider.as_deref() {
        config.set_provider(provider)?;
    }

    setup_logging(cli.verbose, &config.log_level);

    tracing::info!(
        provider = %config.preferred_provider,
        large_model = %config.large_model.identifier,
        small_model = %config.small_model.identifier,
        cache_size = config.model_cache_size,
        debug = config.debug,
        "Starting Manice Router"
    );

    let server = Server::new(config)?;
    server.run().await?;

    Ok(())
}

/// Setup logging from `-v` count, or the configured level when no flag is given
fn setup_logging(verbosity: u8, log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = match verbosity {
        0 => level_directive(log_level),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();
}

fn level_directive(log_level: &str) -> &'static str {
    match log_level.to_uppercase().as_str() {
        "TRACE" => "trace",
        "DEBUG" => "debug",
        "WARNING" | "WARN" => "warn",
        "ERROR" | "CRITICAL" => "error",
        _ => "info",
    }
}
