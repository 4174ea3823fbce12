//! Reqwest-based [`RawFetch`] transport.
//!
//! Wire formats for the upstream scraping endpoints are out of scope of
//! this crate's contract (see [`super::RawFetch`]); this implementation
//! hits a configurable base URL with the active cookie as the session
//! header and expects each endpoint to hand back the shapes in
//! [`super::types`] directly as JSON. Swap in a different [`RawFetch`]
//! for a headless-browser transport without touching the pipeline.

use async_trait::async_trait;
use serde::Deserialize;

use super::client::{RawFailure, RawFetch};
use super::types::{MediaData, Platform, ProfileData, Reply};

/// Minimal reqwest-backed transport. One instance is shared across both
/// platforms; the base URL and cookie header name are the only knobs.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn platform_segment(platform: Platform) -> &'static str {
        match platform {
            Platform::Instagram => "instagram",
            Platform::Twitter => "twitter",
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        cookie: &str,
    ) -> Result<T, RawFailure> {
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .header("Cookie", cookie)
            .send()
            .await
            .map_err(|e| RawFailure::network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RawFailure::http(status.as_u16(), body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| RawFailure::parse(e.to_string()))
    }
}

#[derive(Deserialize)]
struct ShortcodeList {
    shortcodes: Vec<String>,
}

#[async_trait]
impl RawFetch for HttpTransport {
    async fn fetch_profile(
        &self,
        platform: Platform,
        username: &str,
        cookie: &str,
    ) -> Result<ProfileData, RawFailure> {
        let path = format!("/{}/profile/{username}", Self::platform_segment(platform));
        self.get_json(&path, cookie).await
    }

    async fn fetch_media(
        &self,
        platform: Platform,
        shortcode: &str,
        cookie: &str,
    ) -> Result<MediaData, RawFailure> {
        let path = format!("/{}/media/{shortcode}", Self::platform_segment(platform));
        self.get_json(&path, cookie).await
    }

    async fn list_media_shortcodes(
        &self,
        platform: Platform,
        username: &str,
        cookie: &str,
    ) -> Result<Vec<String>, RawFailure> {
        let path = format!("/{}/media/{username}/list", Self::platform_segment(platform));
        let list: ShortcodeList = self.get_json(&path, cookie).await?;
        Ok(list.shortcodes)
    }

    async fn fetch_replies(&self, tweet_id: &str, cookie: &str) -> Result<Vec<Reply>, RawFailure> {
        let path = format!("/twitter/replies/{tweet_id}");
        self.get_json(&path, cookie).await
    }
}
