//! Profilewatch API server binary.
//!
//! Wires together the Store Gateway, Cookie Pool, Scraper Client, Tracking
//! Pipeline, Queue, and cron Scheduler, then serves the HTTP API over them.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Profilewatch API server — tracks public social profiles and serves
/// their growth history.
#[derive(Parser)]
#[command(name = "profilewatch-server", version, about)]
struct Cli {
    /// Path to the profilewatch configuration file.
    #[arg(long, default_value = "~/.profilewatch/config.toml")]
    config: String,

    /// Host address to bind to. Use 0.0.0.0 for LAN access.
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    profilewatch_server::run(&cli.config, cli.host, cli.port).await
}
