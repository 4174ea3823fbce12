//! Profilewatch HTTP API server.
//!
//! Exposes the tracking engine's queue, scheduler, and Store Gateway as a
//! small REST API (spec §6): enqueue-and-await tracking runs, a
//! session-scoped read by tracking id, and diagnostic/manual-trigger
//! endpoints for the queue and cron scheduler.

pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use anyhow::Result;
use axum::routing::{get, post};
use axum::Router;
use profilewatch_core::config::Config;
use profilewatch_core::cookiepool::{CookiePool, CookiePoolConfig};
use profilewatch_core::pipeline::{DailyAnalyticsRunner, TrackingPipeline};
use profilewatch_core::queue::Queue;
use profilewatch_core::scheduler::Scheduler;
use profilewatch_core::scraper::{CookieRotatingScraper, HttpTransport};
use profilewatch_core::storage::{self, StoreGateway};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the complete axum router with all API routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/health", get(routes::health))
        .route("/profiles", post(routes::create_profile))
        .route("/profiles/{username}/refresh", post(routes::refresh_profile))
        .route("/profiles/tracking/{tracking_id}", get(routes::get_by_tracking_id))
        .route("/queue/status", get(routes::queue_status))
        .route("/queue/process", post(routes::queue_process))
        .route("/cron/trigger", post(routes::cron_trigger))
        .route("/cron/schedule", get(routes::cron_schedule));

    Router::new()
        .nest("/api", api)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Wire up the full tracking stack from `config_path` and serve the HTTP
/// API until Ctrl-C or SIGTERM, then shut every background task down
/// cleanly. Shared by the `profilewatch-server` binary and the
/// `profilewatch serve` CLI subcommand.
pub async fn run(config_path: &str, host_override: Option<String>, port_override: Option<u16>) -> Result<()> {
    let config = Config::load(Some(config_path))?;
    let host = host_override.unwrap_or_else(|| config.server.host.clone());
    let port = port_override.unwrap_or(config.server.port);

    tracing::info!(db = %config.storage.db_path, host = %host, port, "starting profilewatch server");

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
    let scraper = Arc::new(CookieRotatingScraper::new(transport, cookie_pool.clone()));

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
    let scheduler = Arc::new(Scheduler::new(
        gateway.clone(),
        queue.clone(),
        config.schedule.daily_cron.clone(),
        refresh_cron,
        tz,
        Some(daily_analytics),
    ));

    let shutdown = CancellationToken::new();

    let dispatcher_cancel = shutdown.clone();
    let dispatcher_queue = queue.clone();
    let dispatcher_handle =
        tokio::spawn(async move { dispatcher_queue.run_dispatcher(dispatcher_cancel).await });

    let reset_cancel = shutdown.clone();
    let reset_pool = cookie_pool.clone();
    let reset_handle = tokio::spawn(async move { reset_pool.run_auto_reset(reset_cancel).await });

    let mut cron_handle = scheduler.clone().start().await?;

    let state = Arc::new(AppState {
        gateway,
        queue,
        scheduler,
        cookie_pool,
    });

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(format!("{host}:{port}")).await?;
    tracing::info!("listening on http://{host}:{port}");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let ctrl_c = tokio::signal::ctrl_c();
            #[cfg(unix)]
            let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("install SIGTERM handler");
            #[cfg(unix)]
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
            #[cfg(not(unix))]
            let _ = ctrl_c.await;
            server_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    let _ = cron_handle.shutdown().await;
    let _ = dispatcher_handle.await;
    let _ = reset_handle.await;

    Ok(())
}
