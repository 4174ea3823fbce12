//! Profilewatch CLI - social analytics collector.
//!
//! Entry point for the `profilewatch` binary. Parses CLI arguments,
//! initializes logging, and dispatches to subcommand handlers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use profilewatch_core::config::Config;
use profilewatch_core::cookiepool::{CookiePool, CookiePoolConfig};
use profilewatch_core::pipeline::{DailyAnalyticsRunner, TrackingPipeline};
use profilewatch_core::queue::Queue;
use profilewatch_core::scheduler::Scheduler;
use profilewatch_core::scraper::{CookieRotatingScraper, HttpTransport};
use profilewatch_core::storage::{self, StoreGateway};
use tracing_subscriber::EnvFilter;

/// Profilewatch - tracks public social profiles and serves their growth
/// history.
#[derive(Parser)]
#[command(name = "profilewatch")]
#[command(version)]
#[command(about = "Social analytics collector for Instagram and Twitter profiles")]
struct Cli {
    /// Path to config.toml
    #[arg(short = 'c', long, global = true, default_value = "~/.profilewatch/config.toml")]
    config: String,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Start the HTTP API server and background scheduler
    Serve(ServeArgs),
    /// Enumerate all tracked profiles, enqueue a tracking run for each, and
    /// wait for the queue to drain. Equivalent to one daily cron tick.
    Tick,
}

#[derive(clap::Args)]
struct ServeArgs {
    /// Host address to bind to. Use 0.0.0.0 for LAN access.
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("profilewatch=debug,profilewatch_core=debug,profilewatch_server=debug,info")
    } else if cli.quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::new("profilewatch=info,profilewatch_core=info,profilewatch_server=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(cli.verbose)
        .compact()
        .init();

    match cli.command {
        Commands::Serve(args) => profilewatch_server::run(&cli.config, args.host, args.port).await,
        Commands::Tick => run_tick(&cli.config).await,
    }
}

/// Build the tracking stack without an HTTP listener, run one scheduler
/// tick, and block until the queue has drained it.
async fn run_tick(config_path: &str) -> Result<()> {
    let config = Config::load(Some(config_path))?;

    let pool = storage::init_db(&config.storage.db_path).await?;
    let gateway = Arc::new(StoreGateway::new(pool));

    let credentials = config.cookies.resolve_credentials()?;
    if credentials.is_empty() {
        tracing::warn!("no Instagram credentials configured; tracking jobs will fail auth");
    }
    let cookie_pool = Arc::new(CookiePool::new(
        credentials,
        CookiePoolConfig {
            failure_threshold: config.cookies.failure_threshold,
            reset_window: config.cookies.reset_window(),
            switch_delay: config.cookies.switch_delay(),
        },
    ));

    let transport = HttpTransport::new(config.scraper.base_url.clone());
    let scraper = Arc::new(CookieRotatingScraper::new(transport, cookie_pool));

    let pipeline = TrackingPipeline::new(
        gateway.clone(),
        scraper,
        config.pipeline.reel_window,
        config.pipeline.reel_detail_delay(),
    );

    let queue = Queue::new(pipeline, config.queue.base_spacing(), config.queue.max_backoff());

    let tz: chrono_tz::Tz = config.schedule.tz.parse().expect("validated by Config::load");
    let refresh_cron = config.schedule.refresh_enabled().then(|| config.schedule.refresh_cron.clone());
    let daily_analytics = Arc::new(DailyAnalyticsRunner::new(gateway.clone()));
    let scheduler = Scheduler::new(
        gateway,
        queue.clone(),
        config.schedule.daily_cron.clone(),
        refresh_cron,
        tz,
        Some(daily_analytics),
    );

    let summary = scheduler.enqueue_all("manual").await?;
    tracing::info!(enqueued = summary.enqueued, "tick enqueued targets");
    if summary.enqueued == 0 {
        return Ok(());
    }

    let cancel = tokio_util::sync::CancellationToken::new();
    let dispatcher_cancel = cancel.clone();
    let dispatcher_queue = queue.clone();
    let dispatcher_handle =
        tokio::spawn(async move { dispatcher_queue.run_dispatcher(dispatcher_cancel).await });

    loop {
        let status = queue.status().await;
        if status.size == 0 && !status.in_flight {
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    cancel.cancel();
    let _ = dispatcher_handle.await;

    if let Some(runner) = scheduler.daily_analytics() {
        match runner.run_once().await {
            Ok(refreshed) => tracing::info!(refreshed, "daily analytics refresh complete"),
            Err(e) => tracing::error!(error = %e, "daily analytics refresh failed"),
        }
    }

    tracing::info!("tick complete");
    Ok(())
}
