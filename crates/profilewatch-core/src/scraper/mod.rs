//! Scraper Client: typed fetch interface, rate-limit detection, and bounded
//! retry around a pluggable, unspecified transport.

mod client;
mod transport;
mod types;

pub use client::{CookieRotatingScraper, RawFailure, RawFetch, ScraperClient};
pub use transport::HttpTransport;
pub use types::{MediaData, Platform, ProfileData, Reply};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookiepool::{CookiePool, CookiePoolConfig};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct ScriptedTransport {
        profile_calls: AtomicU32,
        fail_times: u32,
        then: TransportThen,
    }

    enum TransportThen {
        Succeed,
        RateLimited,
        AuthFailed,
    }

    fn sample_profile() -> ProfileData {
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

    #[async_trait::async_trait]
    impl RawFetch for ScriptedTransport {
        async fn fetch_profile(
            &self,
            _platform: Platform,
            _username: &str,
            _cookie: &str,
        ) -> Result<ProfileData, RawFailure> {
            let n = self.profile_calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                return Err(match self.then {
                    TransportThen::RateLimited => RawFailure::http(429, "slow down"),
                    TransportThen::AuthFailed => RawFailure::http(401, "bad session"),
                    TransportThen::Succeed => RawFailure::network("timeout"),
                });
            }
            Ok(sample_profile())
        }

        async fn fetch_media(
            &self,
            _platform: Platform,
            shortcode: &str,
            _cookie: &str,
        ) -> Result<MediaData, RawFailure> {
            Ok(MediaData {
                shortcode: shortcode.to_string(),
                views: 1000,
                likes: 10,
                comments: 1,
                video_url: None,
                is_video: true,
                duration_secs: Some(12.0),
                taken_at: chrono::Utc::now(),
                reply_count: None,
            })
        }

        async fn list_media_shortcodes(
            &self,
            _platform: Platform,
            _username: &str,
            _cookie: &str,
        ) -> Result<Vec<String>, RawFailure> {
            Ok(vec!["a".to_string(), "b".to_string()])
        }

        async fn fetch_replies(
            &self,
            _tweet_id: &str,
            _cookie: &str,
        ) -> Result<Vec<Reply>, RawFailure> {
            Ok(vec![])
        }
    }

    fn pool() -> Arc<CookiePool> {
        Arc::new(CookiePool::new(
            vec!["a=1".to_string()],
            CookiePoolConfig {
                failure_threshold: 3,
                reset_window: Duration::from_secs(3600),
                switch_delay: Duration::from_millis(1),
            },
        ))
    }

    #[tokio::test]
    async fn success_reports_to_cookie_pool() {
        let cookies = pool();
        let scraper = CookieRotatingScraper::new(
            ScriptedTransport {
                profile_calls: AtomicU32::new(0),
                fail_times: 0,
                then: TransportThen::Succeed,
            },
            cookies.clone(),
        );
        let result = scraper.fetch_profile(Platform::Instagram, "alice").await;
        assert!(result.is_ok());
        assert_eq!(result.unwrap().followers, 100);
    }

    #[tokio::test]
    async fn rate_limit_surfaces_and_marks_failure() {
        let cookies = pool();
        let scraper = CookieRotatingScraper::new(
            ScriptedTransport {
                profile_calls: AtomicU32::new(0),
                fail_times: 1,
                then: TransportThen::RateLimited,
            },
            cookies.clone(),
        );
        let err = scraper
            .fetch_profile(Platform::Instagram, "alice")
            .await
            .unwrap_err();
        assert!(err.is_rate_limited());
        let status = cookies.status().await;
        assert_eq!(status.failure_counts[0], 1);
    }

    #[tokio::test]
    async fn auth_failure_surfaces_without_retry() {
        let cookies = pool();
        let scraper = CookieRotatingScraper::new(
            ScriptedTransport {
                profile_calls: AtomicU32::new(0),
                fail_times: 10,
                then: TransportThen::AuthFailed,
            },
            cookies.clone(),
        );
        let err = scraper
            .fetch_profile(Platform::Instagram, "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::CoreError::AuthFailed(_)));
    }

    #[tokio::test]
    async fn transient_error_retries_then_succeeds() {
        let cookies = pool();
        let scraper = CookieRotatingScraper::new(
            ScriptedTransport {
                profile_calls: AtomicU32::new(0),
                fail_times: 2,
                then: TransportThen::Succeed,
            },
            cookies,
        )
        .with_max_retries(5);
        let result = scraper.fetch_profile(Platform::Instagram, "alice").await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn media_is_reel_when_video_url_or_flagged() {
        let a = MediaData {
            shortcode: "a".to_string(),
            views: 1,
            likes: 1,
            comments: 0,
            video_url: Some("https://example.com/v.mp4".to_string()),
            is_video: false,
            duration_secs: None,
            taken_at: chrono::Utc::now(),
            reply_count: None,
        };
        assert!(a.is_reel());

        let b = MediaData {
            is_video: true,
            video_url: None,
            ..a.clone()
        };
        assert!(b.is_reel());

        let c = MediaData {
            is_video: false,
            video_url: None,
            ..a
        };
        assert!(!c.is_reel());
    }

    #[tokio::test]
    async fn no_active_credential_yields_auth_failed() {
        let cookies = Arc::new(CookiePool::new(vec![], CookiePoolConfig::default()));
        let scraper = CookieRotatingScraper::new(
            ScriptedTransport {
                profile_calls: AtomicU32::new(0),
                fail_times: 0,
                then: TransportThen::Succeed,
            },
            cookies,
        );
        let err = scraper
            .fetch_profile(Platform::Instagram, "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::CoreError::AuthFailed(_)));
    }
}
