//! HTTP-level smoke tests for the profilewatch API, against an in-memory
//! Store Gateway and a wiremock-backed Scraper Client transport.

use std::sync::Arc;
use std::time::Duration;

use http_body_util::BodyExt;
use profilewatch_core::cookiepool::{CookiePool, CookiePoolConfig};
use profilewatch_core::pipeline::TrackingPipeline;
use profilewatch_core::queue::Queue;
use profilewatch_core::scheduler::Scheduler;
use profilewatch_core::scraper::{CookieRotatingScraper, HttpTransport};
use profilewatch_core::storage::{init_test_db, StoreGateway};
use profilewatch_server::state::AppState;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn build_app(scraper_base_url: String) -> Arc<AppState> {
    let pool = init_test_db().await;
    let gateway = Arc::new(StoreGateway::new(pool));

    let cookie_pool = Arc::new(CookiePool::new(
        vec!["session=abc".to_string()],
        CookiePoolConfig::default(),
    ));
    let transport = HttpTransport::new(scraper_base_url);
    let scraper = Arc::new(CookieRotatingScraper::new(transport, cookie_pool.clone()));

    let pipeline = TrackingPipeline::new(gateway.clone(), scraper, 12, Duration::from_millis(1));
    let queue = Queue::new(pipeline, Duration::from_millis(1), Duration::from_secs(60));

    let scheduler = Arc::new(Scheduler::new(
        gateway.clone(),
        queue.clone(),
        "15 2 * * *".to_string(),
        None,
        chrono_tz::Asia::Kolkata,
        None,
    ));

    Arc::new(AppState {
        gateway,
        queue,
        scheduler,
        cookie_pool,
    })
}

async fn mount_profile(server: &MockServer, username: &str, followers: i64) {
    Mock::given(method("GET"))
        .and(path(format!("/instagram/profile/{username}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "external_id": "1",
            "username": username,
            "display_name": "Alice",
            "avatar_url": null,
            "bio": null,
            "external_link": null,
            "followers": followers,
            "following": 50,
            "media_count": 10,
            "reel_count": 3,
            "embedded_shortcodes": [],
            "raw_payload": {}
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/instagram/media/{username}/list")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "shortcodes": [] })))
        .mount(server)
        .await;
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_ok() {
    let server = MockServer::start().await;
    let state = build_app(server.uri()).await;
    let router = profilewatch_server::build_router(state);

    let response = router
        .oneshot(
            axum::http::Request::builder()
                .uri("/api/health")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "status": "ok" }));
}

#[tokio::test]
async fn create_profile_enqueues_and_returns_resolved_profile() {
    let server = MockServer::start().await;
    mount_profile(&server, "alice", 100).await;
    let state = build_app(server.uri()).await;
    let router = profilewatch_server::build_router(state);

    let response = router
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/api/profiles")
                .header("content-type", "application/json")
                .body(axum::body::Body::from(
                    json!({ "platform": "instagram", "username": "alice", "tracking_id": "sess-1" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["profile"]["username"], "alice");
    assert_eq!(body["profile"]["tracking_id"], "sess-1");
    assert_eq!(body["snapshot"]["followers"], 100);
}

#[tokio::test]
async fn create_profile_rejects_unknown_platform() {
    let server = MockServer::start().await;
    let state = build_app(server.uri()).await;
    let router = profilewatch_server::build_router(state);

    let response = router
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/api/profiles")
                .header("content-type", "application/json")
                .body(axum::body::Body::from(
                    json!({ "platform": "tiktok", "username": "alice" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn get_by_tracking_id_returns_profile_and_latest_snapshot() {
    let server = MockServer::start().await;
    mount_profile(&server, "alice", 100).await;
    let state = build_app(server.uri()).await;
    let router = profilewatch_server::build_router(state);

    let create = router
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/api/profiles")
                .header("content-type", "application/json")
                .body(axum::body::Body::from(
                    json!({ "platform": "instagram", "username": "alice", "tracking_id": "sess-2" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(create.status(), axum::http::StatusCode::OK);

    let response = router
        .oneshot(
            axum::http::Request::builder()
                .uri("/api/profiles/tracking/sess-2")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["profile"]["tracking_id"], "sess-2");
    assert_eq!(body["latest_snapshot"]["followers"], 100);
    assert!(body["delta"].is_null());
}

#[tokio::test]
async fn get_by_tracking_id_404s_for_unknown_session() {
    let server = MockServer::start().await;
    let state = build_app(server.uri()).await;
    let router = profilewatch_server::build_router(state);

    let response = router
        .oneshot(
            axum::http::Request::builder()
                .uri("/api/profiles/tracking/does-not-exist")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn queue_status_reports_idle_queue() {
    let server = MockServer::start().await;
    let state = build_app(server.uri()).await;
    let router = profilewatch_server::build_router(state);

    let response = router
        .oneshot(
            axum::http::Request::builder()
                .uri("/api/queue/status")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["size"], 0);
    assert_eq!(body["in_flight"], false);
}

#[tokio::test]
async fn cron_schedule_reports_configured_schedule() {
    let server = MockServer::start().await;
    let state = build_app(server.uri()).await;
    let router = profilewatch_server::build_router(state);

    let response = router
        .oneshot(
            axum::http::Request::builder()
                .uri("/api/cron/schedule")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["daily_cron"], "15 2 * * *");
    assert!(body["refresh_cron"].is_null());
}

#[tokio::test]
async fn cron_trigger_enqueues_nothing_when_no_profiles_tracked() {
    let server = MockServer::start().await;
    let state = build_app(server.uri()).await;
    let router = profilewatch_server::build_router(state);

    let response = router
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/api/cron/trigger")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["enqueued"], 0);
}
