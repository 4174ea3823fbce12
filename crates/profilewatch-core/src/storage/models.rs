//! Row types for the six tracked entities.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Identity of one tracked account on one platform.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct Profile {
    pub id: i64,
    pub platform: String,
    pub username: String,
    pub external_account_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub external_link: Option<String>,
    pub owning_user_id: Option<String>,
    pub tracking_id: String,
    pub last_snapshot_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable point-in-time capture for a Profile.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: i64,
    pub profile_id: i64,
    pub followers: i64,
    pub following: i64,
    pub media_count: i64,
    pub reel_count: i64,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub raw_payload: serde_json::Value,
    pub captured_at: DateTime<Utc>,
}

/// Arithmetic differences between two Snapshots of the same Profile.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct Delta {
    pub id: i64,
    pub profile_id: i64,
    pub base_snapshot_id: i64,
    pub compare_snapshot_id: i64,
    pub followers_diff: i64,
    pub following_diff: i64,
    pub media_diff: i64,
    pub reel_diff: i64,
    pub created_at: DateTime<Utc>,
}

/// One row per (Profile, calendar date).
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct DailyMetric {
    pub id: i64,
    pub profile_id: i64,
    pub date: NaiveDate,
    pub followers_open: i64,
    pub followers_close: i64,
    pub followers_delta: i64,
    pub following_open: i64,
    pub following_close: i64,
    pub following_delta: i64,
    pub media_open: i64,
    pub media_close: i64,
    pub media_delta: i64,
    pub reels_open: i64,
    pub reels_close: i64,
    pub reels_delta: i64,
    pub views_delta: i64,
    pub likes_delta: i64,
    pub comments_delta: i64,
    pub updated_at: DateTime<Utc>,
}

/// One per (Profile, external shortcode); current-value row.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct Reel {
    pub id: i64,
    pub profile_id: i64,
    pub shortcode: String,
    pub views: i64,
    pub likes: i64,
    pub comments: i64,
    pub views_delta: i64,
    pub likes_delta: i64,
    pub comments_delta: i64,
    pub reply_count: Option<i64>,
    pub source_url: Option<String>,
    pub mirrored_url: Option<String>,
    pub is_video: bool,
    pub taken_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only historical snapshot per Reel per tracking run.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct ReelMetric {
    pub id: i64,
    pub reel_id: i64,
    pub views: i64,
    pub likes: i64,
    pub comments: i64,
    pub captured_at: DateTime<Utc>,
}

/// A reply to a tracked tweet (Twitter pipeline only). Read-append; no
/// deltas.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct TweetReply {
    pub id: i64,
    pub profile_id: i64,
    pub tweet_id: String,
    pub reply_tweet_id: String,
    pub author_handle: String,
    pub body: String,
    pub posted_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
