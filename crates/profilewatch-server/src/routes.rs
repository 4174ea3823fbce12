//! Route handlers (spec §6's HTTP surface).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use profilewatch_core::queue::TargetKey;
use profilewatch_core::scraper::Platform;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

fn parse_platform(s: &str) -> Result<Platform, ApiError> {
    match s.to_ascii_lowercase().as_str() {
        "instagram" => Ok(Platform::Instagram),
        "twitter" => Ok(Platform::Twitter),
        other => Err(ApiError::BadRequest(format!("unknown platform: {other}"))),
    }
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
pub struct CreateProfileRequest {
    pub platform: String,
    pub username: String,
    pub tracking_id: Option<String>,
    pub user_id: Option<String>,
}

/// `POST /profiles` — enqueue an immediate Job and await its completion,
/// returning the resolved Profile row.
pub async fn create_profile(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateProfileRequest>,
) -> Result<Json<Value>, ApiError> {
    let platform = parse_platform(&req.platform)?;
    let target = TargetKey { platform, username: req.username };

    let fut = state.queue.add(target, true, req.tracking_id, req.user_id).await;
    let output = fut.await?;

    Ok(Json(json!({
        "profile": output.profile,
        "snapshot": output.snapshot,
    })))
}

#[derive(Debug, Deserialize)]
pub struct RefreshQuery {
    pub platform: String,
    pub tracking_id: Option<String>,
    pub user_id: Option<String>,
}

/// `POST /profiles/:username/refresh` — enqueue an immediate Job and await.
pub async fn refresh_profile(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
    Query(query): Query<RefreshQuery>,
) -> Result<Json<Value>, ApiError> {
    let platform = parse_platform(&query.platform)?;
    let target = TargetKey { platform, username };

    let fut = state.queue.add(target, true, query.tracking_id, query.user_id).await;
    let output = fut.await?;

    Ok(Json(json!({
        "profile": output.profile,
        "snapshot": output.snapshot,
    })))
}

/// `GET /profiles/tracking/:tracking_id` — session-scoped read: the Profile
/// plus its latest Snapshot, and the freshest of Delta/DailyMetric.
pub async fn get_by_tracking_id(
    State(state): State<Arc<AppState>>,
    Path(tracking_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let profile = state.gateway.get_profile_by_tracking_id(&tracking_id).await?;
    let latest_snapshot = state.gateway.get_latest_session_snapshot(&profile).await?;

    let delta = state.gateway.get_latest_session_delta(&profile).await?;
    let daily_metric = state.gateway.get_latest_session_daily_metric(&profile).await?;

    let delta_json = match (delta, daily_metric) {
        (Some(d), Some(m)) if m.updated_at > d.created_at => json!({ "source": "daily_metric", "value": m }),
        (Some(d), _) => json!({ "source": "delta", "value": d }),
        (None, Some(m)) => json!({ "source": "daily_metric", "value": m }),
        (None, None) => Value::Null,
    };

    Ok(Json(json!({
        "profile": profile,
        "latest_snapshot": latest_snapshot,
        "delta": delta_json,
    })))
}

#[derive(Debug, Serialize)]
struct QueueStatusView {
    size: usize,
    in_flight: bool,
    in_flight_target: Option<String>,
    last_dispatch_seconds_ago: Option<f64>,
    base_spacing_ms: u128,
    effective_spacing_ms: u128,
    consecutive_rate_limit_errors: u32,
    pending_targets: Vec<String>,
}

/// `GET /queue/status` — Queue diagnostic snapshot.
pub async fn queue_status(State(state): State<Arc<AppState>>) -> Json<QueueStatusView> {
    let status = state.queue.status().await;
    Json(QueueStatusView {
        size: status.size,
        in_flight: status.in_flight,
        in_flight_target: status.in_flight_target,
        last_dispatch_seconds_ago: status.last_dispatch_at.map(|t| t.elapsed().as_secs_f64()),
        base_spacing_ms: status.base_spacing.as_millis(),
        effective_spacing_ms: status.effective_spacing.as_millis(),
        consecutive_rate_limit_errors: status.consecutive_rate_limit_errors,
        pending_targets: status.pending_targets,
    })
}

/// `POST /queue/process` — manual dispatcher kick.
pub async fn queue_process(State(state): State<Arc<AppState>>) -> Json<Value> {
    state.queue.kick();
    Json(json!({ "status": "kicked" }))
}

/// `POST /cron/trigger` — manual enqueue-all, equivalent to the daily tick.
pub async fn cron_trigger(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let summary = state.scheduler.enqueue_all("manual").await?;
    Ok(Json(json!({ "tick": summary.name, "enqueued": summary.enqueued })))
}

/// `GET /cron/schedule` — configured schedules.
pub async fn cron_schedule(State(state): State<Arc<AppState>>) -> Json<Value> {
    let info = state.scheduler.schedule_info();
    Json(json!({
        "daily_cron": info.daily_cron,
        "refresh_cron": info.refresh_cron,
        "timezone": info.timezone,
    }))
}
