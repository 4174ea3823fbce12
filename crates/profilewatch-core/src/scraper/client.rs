//! Scraper client: error classification, retry, and Cookie Pool integration
//! around a pluggable, unspecified transport.
//!
//! The transport (plain HTTP, or a headless browser for enumerations that
//! need cookies and JavaScript) is intentionally not implemented here;
//! callers plug in a [`RawFetch`] implementation. This module owns the
//! contract in the specification: rate-limit detection, Cookie Pool
//! success/failure reporting, and bounded intra-call retry for transient
//! failures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::cookiepool::CookiePool;
use crate::error::CoreError;

use super::types::{MediaData, Platform, ProfileData, Reply};

/// The kind of low-level failure a transport implementation observed.
/// Transports report facts (status code, whether the body carries a
/// rate-limit marker, whether the response failed to parse); this module
/// turns those facts into the [`CoreError`] taxonomy.
#[derive(Debug, Clone)]
pub struct RawFailure {
    pub status: Option<u16>,
    pub rate_limit_marker: bool,
    pub network_error: bool,
    pub parse_error: bool,
    pub message: String,
}

impl RawFailure {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            rate_limit_marker: false,
            network_error: true,
            parse_error: false,
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            status: None,
            rate_limit_marker: false,
            network_error: false,
            parse_error: true,
            message: message.into(),
        }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        let text = message.into();
        let rate_limit_marker = text.to_ascii_lowercase().contains("wait a few minutes");
        Self {
            status: Some(status),
            rate_limit_marker,
            network_error: false,
            parse_error: false,
            message: text,
        }
    }
}

/// The pluggable transport. Implementations drive the actual outbound
/// calls (HTTP client, headless browser) and report raw facts; they do
/// not classify errors themselves.
#[async_trait]
pub trait RawFetch: Send + Sync {
    async fn fetch_profile(
        &self,
        platform: Platform,
        username: &str,
        cookie: &str,
    ) -> Result<ProfileData, RawFailure>;

    async fn fetch_media(
        &self,
        platform: Platform,
        shortcode: &str,
        cookie: &str,
    ) -> Result<MediaData, RawFailure>;

    async fn list_media_shortcodes(
        &self,
        platform: Platform,
        username: &str,
        cookie: &str,
    ) -> Result<Vec<String>, RawFailure>;

    async fn fetch_replies(
        &self,
        tweet_id: &str,
        cookie: &str,
    ) -> Result<Vec<Reply>, RawFailure>;
}

fn classify(failure: &RawFailure, retry_after: Duration) -> CoreError {
    if failure.parse_error {
        return CoreError::Parse(failure.message.clone());
    }
    let is_rate_limit = failure.status == Some(429)
        || (failure.status == Some(401) && failure.rate_limit_marker)
        || failure.rate_limit_marker;
    if is_rate_limit {
        return CoreError::RateLimited { retry_after };
    }
    match failure.status {
        Some(401) | Some(403) => CoreError::AuthFailed(failure.message.clone()),
        Some(s) if (500..600).contains(&s) => CoreError::Transient(failure.message.clone()),
        _ if failure.network_error => CoreError::Transient(failure.message.clone()),
        _ => CoreError::Fatal(failure.message.clone()),
    }
}

/// The capability set the Tracking Pipeline depends on. Implemented by
/// [`ScraperClient`]; a trait so the pipeline and tests can depend on an
/// interface instead of a concrete transport.
#[async_trait]
pub trait ScraperClient: Send + Sync {
    async fn fetch_profile(
        &self,
        platform: Platform,
        username: &str,
    ) -> Result<ProfileData, CoreError>;

    async fn fetch_media(
        &self,
        platform: Platform,
        shortcode: &str,
    ) -> Result<MediaData, CoreError>;

    async fn list_media_shortcodes(
        &self,
        platform: Platform,
        username: &str,
    ) -> Result<Vec<String>, CoreError>;

    async fn fetch_replies(&self, tweet_id: &str) -> Result<Vec<Reply>, CoreError>;
}

/// Default [`ScraperClient`] implementation: wraps a [`RawFetch`] transport
/// with Cookie Pool rotation and bounded transient-error retry.
pub struct CookieRotatingScraper<F: RawFetch> {
    transport: F,
    cookie_pool: Arc<CookiePool>,
    max_transient_retries: u32,
}

impl<F: RawFetch> CookieRotatingScraper<F> {
    pub fn new(transport: F, cookie_pool: Arc<CookiePool>) -> Self {
        Self {
            transport,
            cookie_pool,
            max_transient_retries: 3,
        }
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_transient_retries = max;
        self
    }

    async fn current_cookie(&self) -> Result<String, CoreError> {
        self.cookie_pool
            .current()
            .await
            .ok_or_else(|| CoreError::AuthFailed("no active credential".to_string()))
    }

    /// Runs `op` with the current credential, retrying transient failures
    /// with exponential intra-call backoff, and reporting success/failure
    /// to the Cookie Pool.
    async fn call<T, Op, Fut>(&self, op: Op) -> Result<T, CoreError>
    where
        Op: Fn(String) -> Fut,
        Fut: std::future::Future<Output = Result<T, RawFailure>>,
    {
        let mut attempt = 0;
        loop {
            let cookie = self.current_cookie().await?;
            match op(cookie).await {
                Ok(value) => {
                    self.cookie_pool.mark_success().await;
                    return Ok(value);
                }
                Err(failure) => {
                    tracing::debug!(
                        status = ?failure.status,
                        message = %crate::redact::redact_secrets(&failure.message),
                        "raw fetch failed"
                    );
                    // Classify with a placeholder retry_after; the real
                    // wait comes from the Cookie Pool's own failure
                    // bookkeeping once we know this is a rate limit.
                    match classify(&failure, Duration::ZERO) {
                        CoreError::RateLimited { .. } => {
                            let retry_after = self.cookie_pool.mark_failure("rate_limit").await;
                            return Err(CoreError::RateLimited { retry_after });
                        }
                        CoreError::AuthFailed(msg) => {
                            self.cookie_pool.mark_failure("auth_failed").await;
                            return Err(CoreError::AuthFailed(msg));
                        }
                        CoreError::Transient(msg) => {
                            attempt += 1;
                            if attempt > self.max_transient_retries {
                                return Err(CoreError::Transient(msg));
                            }
                            let backoff = Duration::from_millis(200 * 2u64.pow(attempt - 1));
                            tokio::time::sleep(backoff).await;
                            continue;
                        }
                        other => return Err(other),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl<F: RawFetch + Send + Sync> ScraperClient for CookieRotatingScraper<F> {
    async fn fetch_profile(
        &self,
        platform: Platform,
        username: &str,
    ) -> Result<ProfileData, CoreError> {
        self.call(|cookie| async move {
            self.transport.fetch_profile(platform, username, &cookie).await
        })
        .await
    }

    async fn fetch_media(
        &self,
        platform: Platform,
        shortcode: &str,
    ) -> Result<MediaData, CoreError> {
        self.call(|cookie| async move {
            self.transport.fetch_media(platform, shortcode, &cookie).await
        })
        .await
    }

    async fn list_media_shortcodes(
        &self,
        platform: Platform,
        username: &str,
    ) -> Result<Vec<String>, CoreError> {
        self.call(|cookie| async move {
            self.transport
                .list_media_shortcodes(platform, username, &cookie)
                .await
        })
        .await
    }

    async fn fetch_replies(&self, tweet_id: &str) -> Result<Vec<Reply>, CoreError> {
        self.call(|cookie| async move { self.transport.fetch_replies(tweet_id, &cookie).await })
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::cookiepool::CookiePoolConfig;

    fn profile_data() -> ProfileData {
        ProfileData {
            external_id: "1".to_string(),
            username: "alice".to_string(),
            display_name: "Alice".to_string(),
            avatar_url: None,
            bio: None,
            external_link: None,
            followers: 100,
            following: 50,
            media_count: 10,
            reel_count: 3,
            embedded_shortcodes: vec![],
            raw_payload: serde_json::json!({}),
        }
    }

    struct ScriptedTransport {
        responses: std::sync::Mutex<Vec<Result<ProfileData, RawFailure>>>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl RawFetch for ScriptedTransport {
        async fn fetch_profile(
            &self,
            _platform: Platform,
            _username: &str,
            _cookie: &str,
        ) -> Result<ProfileData, RawFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses.lock().unwrap().remove(0)
        }

        async fn fetch_media(
            &self,
            _platform: Platform,
            _shortcode: &str,
            _cookie: &str,
        ) -> Result<MediaData, RawFailure> {
            unimplemented!()
        }

        async fn list_media_shortcodes(
            &self,
            _platform: Platform,
            _username: &str,
            _cookie: &str,
        ) -> Result<Vec<String>, RawFailure> {
            unimplemented!()
        }

        async fn fetch_replies(&self, _tweet_id: &str, _cookie: &str) -> Result<Vec<Reply>, RawFailure> {
            unimplemented!()
        }
    }

    fn pool() -> Arc<CookiePool> {
        Arc::new(CookiePool::new(
            vec!["cookie-a".to_string()],
            CookiePoolConfig::default(),
        ))
    }

    #[test]
    fn classify_maps_429_to_rate_limited() {
        let failure = RawFailure::http(429, "slow down");
        assert!(matches!(
            classify(&failure, Duration::from_secs(1)),
            CoreError::RateLimited { .. }
        ));
    }

    #[test]
    fn classify_maps_textual_marker_to_rate_limited_even_on_401() {
        let failure = RawFailure::http(401, "please wait a few minutes and try again");
        assert!(matches!(
            classify(&failure, Duration::ZERO),
            CoreError::RateLimited { .. }
        ));
    }

    #[test]
    fn classify_maps_plain_401_to_auth_failed() {
        let failure = RawFailure::http(401, "bad session");
        assert!(matches!(classify(&failure, Duration::ZERO), CoreError::AuthFailed(_)));
    }

    #[test]
    fn classify_maps_5xx_and_network_errors_to_transient() {
        assert!(matches!(
            classify(&RawFailure::http(503, "down"), Duration::ZERO),
            CoreError::Transient(_)
        ));
        assert!(matches!(
            classify(&RawFailure::network("connection reset"), Duration::ZERO),
            CoreError::Transient(_)
        ));
    }

    #[test]
    fn classify_maps_parse_error_regardless_of_status() {
        assert!(matches!(classify(&RawFailure::parse("bad json"), Duration::ZERO), CoreError::Parse(_)));
    }

    #[tokio::test]
    async fn success_marks_cookie_pool_success_and_clears_failure_count() {
        let pool = pool();
        pool.mark_failure("rate_limit").await;
        assert_eq!(pool.status().await.failure_counts[0], 1);

        let transport = ScriptedTransport {
            responses: std::sync::Mutex::new(vec![Ok(profile_data())]),
            calls: AtomicU32::new(0),
        };
        let scraper = CookieRotatingScraper::new(transport, pool.clone());
        let result = scraper.fetch_profile(Platform::Instagram, "alice").await;
        assert!(result.is_ok());
        assert_eq!(pool.status().await.failure_counts[0], 0);
    }

    #[tokio::test]
    async fn transient_failure_retries_then_succeeds() {
        let transport = ScriptedTransport {
            responses: std::sync::Mutex::new(vec![
                Err(RawFailure::http(503, "down")),
                Err(RawFailure::http(503, "down")),
                Ok(profile_data()),
            ]),
            calls: AtomicU32::new(0),
        };
        let scraper = CookieRotatingScraper::new(transport, pool());
        let result = scraper.fetch_profile(Platform::Instagram, "alice").await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn transient_failure_exhausts_retries_and_surfaces() {
        let transport = ScriptedTransport {
            responses: std::sync::Mutex::new(vec![
                Err(RawFailure::http(503, "down")),
                Err(RawFailure::http(503, "down")),
                Err(RawFailure::http(503, "down")),
                Err(RawFailure::http(503, "down")),
            ]),
            calls: AtomicU32::new(0),
        };
        let scraper = CookieRotatingScraper::new(transport, pool());
        let result = scraper.fetch_profile(Platform::Instagram, "alice").await;
        assert!(matches!(result, Err(CoreError::Transient(_))));
    }

    #[tokio::test]
    async fn rate_limit_marks_cookie_pool_failure_with_retry_after() {
        let pool = pool();
        let transport = ScriptedTransport {
            responses: std::sync::Mutex::new(vec![Err(RawFailure::http(429, "slow down"))]),
            calls: AtomicU32::new(0),
        };
        let scraper = CookieRotatingScraper::new(transport, pool.clone());
        let result = scraper.fetch_profile(Platform::Instagram, "alice").await;
        assert!(matches!(result, Err(CoreError::RateLimited { .. })));
        assert_eq!(pool.status().await.failure_counts[0], 1);
    }
}
