//! Typed results the scraper client hands back to the tracking pipeline.

use serde::{Deserialize, Serialize};

/// The platform a target belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Instagram,
    Twitter,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Instagram => write!(f, "instagram"),
            Self::Twitter => write!(f, "twitter"),
        }
    }
}

/// Result of `fetchProfile`: public counts, bio, avatar, external link,
/// and the latest N embedded media items (truncated by upstream).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileData {
    pub external_id: String,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub external_link: Option<String>,
    pub followers: i64,
    pub following: i64,
    pub media_count: i64,
    pub reel_count: i64,
    pub embedded_shortcodes: Vec<String>,
    pub raw_payload: serde_json::Value,
}

/// Result of `fetchMedia`: detailed metrics for one media item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaData {
    pub shortcode: String,
    pub views: i64,
    pub likes: i64,
    pub comments: i64,
    pub video_url: Option<String>,
    pub is_video: bool,
    pub duration_secs: Option<f64>,
    pub taken_at: chrono::DateTime<chrono::Utc>,
    /// Reply count, populated for Twitter targets; `None` on platforms
    /// that don't surface it (Instagram media has no reply count).
    #[serde(default)]
    pub reply_count: Option<i64>,
}

impl MediaData {
    /// A media item is treated as a reel for video-related APIs when it
    /// either carries a video URL or is flagged as video by upstream.
    pub fn is_reel(&self) -> bool {
        self.video_url.is_some() || self.is_video
    }
}

/// One reply to a tracked tweet (Twitter pipeline only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub reply_tweet_id: String,
    pub author_handle: String,
    pub body: String,
    pub posted_at: chrono::DateTime<chrono::Utc>,
}
