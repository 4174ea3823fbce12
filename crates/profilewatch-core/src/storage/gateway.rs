//! Store Gateway: the only component that touches SQL directly.
//!
//! Every write here is scoped to keep the append-only entities (snapshots,
//! deltas, reel_metrics, tweet_replies) truly append-only: nothing in this
//! module ever issues an `UPDATE` or `DELETE` against those tables. Profile,
//! reel, and daily_metric rows are the only ones that mutate in place, and
//! `update_daily_metric_for_today` refuses to touch a row whose `date`
//! differs from the date it was called with.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use serde_json::Value as JsonValue;
use sqlx::Row;
use uuid::Uuid;

use crate::error::{CoreError, StorageError};
use crate::queue::TargetKey;
use crate::scheduler::ProfileSource;
use crate::scraper::Platform;

use super::models::{DailyMetric, Delta, Profile, Reel, ReelMetric};
use super::DbPool;

/// Everything observed about a Profile's identity on a tracking run, used
/// to resolve or create its row (pipeline step 2).
#[derive(Debug, Clone)]
pub struct ProfileIdentity {
    pub platform: Platform,
    pub username: String,
    pub external_account_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub external_link: Option<String>,
    pub owning_user_id: Option<String>,
    pub tracking_id: Option<String>,
}

/// Fields carried by a new Snapshot row.
#[derive(Debug, Clone)]
pub struct NewSnapshot {
    pub profile_id: i64,
    pub followers: i64,
    pub following: i64,
    pub media_count: i64,
    pub reel_count: i64,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub raw_payload: JsonValue,
    pub captured_at: DateTime<Utc>,
}

/// Fields carried by a new Reel row (pipeline step 9, first sighting).
#[derive(Debug, Clone)]
pub struct NewReel {
    pub profile_id: i64,
    pub shortcode: String,
    pub views: i64,
    pub likes: i64,
    pub comments: i64,
    pub reply_count: Option<i64>,
    pub source_url: Option<String>,
    pub mirrored_url: Option<String>,
    pub is_video: bool,
    pub taken_at: DateTime<Utc>,
}

/// Mutable fields applied to a Reel on a later sighting.
#[derive(Debug, Clone)]
pub struct ReelRefresh {
    pub views: i64,
    pub likes: i64,
    pub comments: i64,
    pub reply_count: Option<i64>,
}

/// Open/close/delta fields for one Profile on one calendar date.
#[derive(Debug, Clone)]
pub struct DailyMetricFields {
    pub followers: i64,
    pub following: i64,
    pub media: i64,
    pub reels: i64,
    pub views_delta: i64,
    pub likes_delta: i64,
    pub comments_delta: i64,
}

pub struct StoreGateway {
    pool: DbPool,
}

impl StoreGateway {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Resolve the Profile row for `identity`, creating it if this is the
    /// first time it is seen, per the conflict-resolution rule: a known
    /// `tracking_id` always wins; otherwise the row is looked up (and, if
    /// absent, created) by `(platform, username, owning_user_id)`. Multiple
    /// end users tracking the same public handle get distinct Profile rows.
    pub async fn resolve_profile(&self, identity: ProfileIdentity) -> Result<Profile, CoreError> {
        let mut tx = self.pool.begin().await.map_err(StorageError::from)?;
        let now = Utc::now();
        let platform = identity.platform.to_string();

        if let Some(tracking_id) = &identity.tracking_id {
            if let Some(existing) =
                sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE tracking_id = ?")
                    .bind(tracking_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(StorageError::from)?
            {
                // Same tracking-id as before: this continues the session
                // that's already open, it doesn't reopen it. `updated_at`
                // stays put so session-scoped reads keep their boundary.
                sqlx::query(
                    "UPDATE profiles SET display_name = ?, avatar_url = ?, bio = ?, \
                     external_link = ? WHERE id = ?",
                )
                .bind(&identity.display_name)
                .bind(&identity.avatar_url)
                .bind(&identity.bio)
                .bind(&identity.external_link)
                .bind(existing.id)
                .execute(&mut *tx)
                .await
                .map_err(StorageError::from)?;
                tx.commit().await.map_err(StorageError::from)?;
                return Ok(Profile {
                    display_name: identity.display_name,
                    avatar_url: identity.avatar_url,
                    bio: identity.bio,
                    external_link: identity.external_link,
                    ..existing
                });
            }
        }

        let existing = sqlx::query_as::<_, Profile>(
            "SELECT * FROM profiles WHERE platform = ? AND username = ? AND \
             owning_user_id IS ?",
        )
        .bind(&platform)
        .bind(&identity.username)
        .bind(&identity.owning_user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(StorageError::from)?;

        if let Some(existing) = existing {
            // A caller-supplied tracking-id that didn't match directly (the
            // row predates it, or the caller is reattaching a session) gets
            // aligned onto this row rather than minting a second one — that
            // reassignment opens a new session, so `updated_at` moves. A run
            // with no caller-supplied tracking-id (the cron/automatic path)
            // is just refreshing profile fields, not opening a session.
            let tracking_id = identity.tracking_id.clone().unwrap_or(existing.tracking_id.clone());
            let opens_session = identity.tracking_id.is_some();
            let new_updated_at = if opens_session { now } else { existing.updated_at };
            sqlx::query(
                "UPDATE profiles SET display_name = ?, avatar_url = ?, bio = ?, \
                 external_link = ?, tracking_id = ?, updated_at = ? WHERE id = ?",
            )
            .bind(&identity.display_name)
            .bind(&identity.avatar_url)
            .bind(&identity.bio)
            .bind(&identity.external_link)
            .bind(&tracking_id)
            .bind(new_updated_at)
            .bind(existing.id)
            .execute(&mut *tx)
            .await
            .map_err(StorageError::from)?;
            tx.commit().await.map_err(StorageError::from)?;
            return Ok(Profile {
                display_name: identity.display_name,
                avatar_url: identity.avatar_url,
                bio: identity.bio,
                external_link: identity.external_link,
                tracking_id,
                updated_at: new_updated_at,
                ..existing
            });
        }

        let tracking_id = identity
            .tracking_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let inserted = sqlx::query(
            "INSERT INTO profiles (platform, username, external_account_id, display_name, \
             avatar_url, bio, external_link, owning_user_id, tracking_id, last_snapshot_id, \
             created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?)",
        )
        .bind(&platform)
        .bind(&identity.username)
        .bind(&identity.external_account_id)
        .bind(&identity.display_name)
        .bind(&identity.avatar_url)
        .bind(&identity.bio)
        .bind(&identity.external_link)
        .bind(&identity.owning_user_id)
        .bind(&tracking_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await;

        let profile = match inserted {
            Ok(result) => {
                let id = result.last_insert_rowid();
                sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE id = ?")
                    .bind(id)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(StorageError::from)?
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                sqlx::query_as::<_, Profile>(
                    "SELECT * FROM profiles WHERE tracking_id = ? OR \
                     (platform = ? AND username = ? AND owning_user_id IS ?)",
                )
                .bind(&tracking_id)
                .bind(&platform)
                .bind(&identity.username)
                .bind(&identity.owning_user_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(StorageError::from)?
                .ok_or_else(|| StorageError::Conflict("profiles uniqueness".to_string()))?
            }
            Err(e) => return Err(StorageError::from(e).into()),
        };

        tx.commit().await.map_err(StorageError::from)?;
        Ok(profile)
    }

    /// Point the Profile at its latest Snapshot. Leaves `updated_at` (the
    /// session-open boundary, set only by [`Self::resolve_profile`]) alone —
    /// this runs on every tracking run, not just the ones that open a
    /// session.
    pub async fn touch_last_snapshot(&self, profile_id: i64, snapshot_id: i64) -> Result<(), CoreError> {
        sqlx::query("UPDATE profiles SET last_snapshot_id = ? WHERE id = ?")
            .bind(snapshot_id)
            .bind(profile_id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    pub async fn get_profile(&self, profile_id: i64) -> Result<Profile, CoreError> {
        sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE id = ?")
            .bind(profile_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?
            .ok_or_else(|| CoreError::NotFound(format!("profile {profile_id}")))
    }

    pub async fn get_profile_by_tracking_id(&self, tracking_id: &str) -> Result<Profile, CoreError> {
        sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE tracking_id = ?")
            .bind(tracking_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?
            .ok_or_else(|| CoreError::NotFound(format!("tracking id {tracking_id}")))
    }

    pub async fn insert_snapshot(&self, new: NewSnapshot) -> Result<Snapshot, CoreError> {
        let result = sqlx::query(
            "INSERT INTO snapshots (profile_id, followers, following, media_count, reel_count, \
             bio, avatar_url, raw_payload, captured_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(new.profile_id)
        .bind(new.followers)
        .bind(new.following)
        .bind(new.media_count)
        .bind(new.reel_count)
        .bind(&new.bio)
        .bind(&new.avatar_url)
        .bind(new.raw_payload.to_string())
        .bind(new.captured_at)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;

        let id = result.last_insert_rowid();
        self.get_snapshot(id).await
    }

    pub async fn get_snapshot(&self, id: i64) -> Result<Snapshot, CoreError> {
        let row = sqlx::query(
            "SELECT id, profile_id, followers, following, media_count, reel_count, bio, \
             avatar_url, raw_payload, captured_at FROM snapshots WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::from)?
        .ok_or_else(|| CoreError::NotFound(format!("snapshot {id}")))?;
        row_to_snapshot(&row)
    }

    /// Most recent snapshots for a Profile, newest first. The pipeline's
    /// baseline rule uses `limit = 2` and compares against index 1 (the
    /// second-most-recent, i.e. the one before the snapshot just inserted).
    pub async fn get_recent_snapshots(
        &self,
        profile_id: i64,
        limit: i64,
    ) -> Result<Vec<Snapshot>, CoreError> {
        let rows = sqlx::query(
            "SELECT id, profile_id, followers, following, media_count, reel_count, bio, \
             avatar_url, raw_payload, captured_at FROM snapshots WHERE profile_id = ? \
             ORDER BY captured_at DESC, id DESC LIMIT ?",
        )
        .bind(profile_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)?;
        rows.iter().map(row_to_snapshot).collect()
    }

    /// Snapshots captured at or after `from`, oldest first. Used for
    /// session-scoped reads (`from` is the session start timestamp).
    pub async fn get_snapshots_since(
        &self,
        profile_id: i64,
        from: DateTime<Utc>,
    ) -> Result<Vec<Snapshot>, CoreError> {
        let rows = sqlx::query(
            "SELECT id, profile_id, followers, following, media_count, reel_count, bio, \
             avatar_url, raw_payload, captured_at FROM snapshots WHERE profile_id = ? AND \
             captured_at >= ? ORDER BY captured_at ASC",
        )
        .bind(profile_id)
        .bind(from)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)?;
        rows.iter().map(row_to_snapshot).collect()
    }

    pub async fn insert_delta(
        &self,
        profile_id: i64,
        base_snapshot_id: i64,
        compare_snapshot_id: i64,
        followers_diff: i64,
        following_diff: i64,
        media_diff: i64,
        reel_diff: i64,
    ) -> Result<Delta, CoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO deltas (profile_id, base_snapshot_id, compare_snapshot_id, \
             followers_diff, following_diff, media_diff, reel_diff, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(profile_id)
        .bind(base_snapshot_id)
        .bind(compare_snapshot_id)
        .bind(followers_diff)
        .bind(following_diff)
        .bind(media_diff)
        .bind(reel_diff)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;

        Ok(Delta {
            id: result.last_insert_rowid(),
            profile_id,
            base_snapshot_id,
            compare_snapshot_id,
            followers_diff,
            following_diff,
            media_diff,
            reel_diff,
            created_at: now,
        })
    }

    pub async fn get_reel(&self, profile_id: i64, shortcode: &str) -> Result<Option<Reel>, CoreError> {
        let reel = sqlx::query_as::<_, Reel>(
            "SELECT * FROM reels WHERE profile_id = ? AND shortcode = ?",
        )
        .bind(profile_id)
        .bind(shortcode)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(reel)
    }

    /// The `limit` most recently seen reels for a Profile, used to build
    /// the reconciliation set (new shortcodes ∪ the newest already-tracked
    /// ones, capped at the twelve the spec refreshes per run).
    pub async fn list_recent_reels(&self, profile_id: i64, limit: i64) -> Result<Vec<Reel>, CoreError> {
        let reels = sqlx::query_as::<_, Reel>(
            "SELECT * FROM reels WHERE profile_id = ? ORDER BY taken_at DESC LIMIT ?",
        )
        .bind(profile_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(reels)
    }

    /// Insert a Reel on first sighting. Collisions (a concurrent run
    /// already inserted the same shortcode) resolve by re-reading the row
    /// rather than erroring.
    pub async fn upsert_new_reel(&self, new: NewReel) -> Result<Reel, CoreError> {
        let now = Utc::now();
        let inserted = sqlx::query(
            "INSERT INTO reels (profile_id, shortcode, views, likes, comments, views_delta, \
             likes_delta, comments_delta, reply_count, source_url, mirrored_url, is_video, \
             taken_at, created_at, updated_at) VALUES (?, ?, ?, ?, ?, 0, 0, 0, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(new.profile_id)
        .bind(&new.shortcode)
        .bind(new.views)
        .bind(new.likes)
        .bind(new.comments)
        .bind(new.reply_count)
        .bind(&new.source_url)
        .bind(&new.mirrored_url)
        .bind(new.is_video)
        .bind(new.taken_at)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => self
                .get_reel(new.profile_id, &new.shortcode)
                .await?
                .ok_or_else(|| CoreError::Fatal("reel vanished after insert".to_string())),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => self
                .get_reel(new.profile_id, &new.shortcode)
                .await?
                .ok_or_else(|| CoreError::Conflict("reels uniqueness".to_string())),
            Err(e) => Err(StorageError::from(e).into()),
        }
    }

    /// Apply a later sighting to an already-tracked reel: clamp deltas to
    /// non-negative (views/likes/comments only ever grow in the public
    /// count), update current values, and bump `updated_at`.
    pub async fn refresh_reel(&self, reel_id: i64, refresh: ReelRefresh) -> Result<Reel, CoreError> {
        let current = sqlx::query_as::<_, Reel>("SELECT * FROM reels WHERE id = ?")
            .bind(reel_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?
            .ok_or_else(|| CoreError::NotFound(format!("reel {reel_id}")))?;

        let views_delta = (refresh.views - current.views).max(0);
        let likes_delta = (refresh.likes - current.likes).max(0);
        let comments_delta = (refresh.comments - current.comments).max(0);
        let now = Utc::now();

        sqlx::query(
            "UPDATE reels SET views = ?, likes = ?, comments = ?, views_delta = ?, \
             likes_delta = ?, comments_delta = ?, reply_count = ?, updated_at = ? WHERE id = ?",
        )
        .bind(refresh.views)
        .bind(refresh.likes)
        .bind(refresh.comments)
        .bind(views_delta)
        .bind(likes_delta)
        .bind(comments_delta)
        .bind(refresh.reply_count)
        .bind(now)
        .bind(reel_id)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;

        Ok(Reel {
            views: refresh.views,
            likes: refresh.likes,
            comments: refresh.comments,
            views_delta,
            likes_delta,
            comments_delta,
            reply_count: refresh.reply_count,
            updated_at: now,
            ..current
        })
    }

    pub async fn insert_reel_metric(
        &self,
        reel_id: i64,
        views: i64,
        likes: i64,
        comments: i64,
    ) -> Result<ReelMetric, CoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO reel_metrics (reel_id, views, likes, comments, captured_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(reel_id)
        .bind(views)
        .bind(likes)
        .bind(comments)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;

        Ok(ReelMetric {
            id: result.last_insert_rowid(),
            reel_id,
            views,
            likes,
            comments,
            captured_at: now,
        })
    }

    pub async fn get_daily_metric(
        &self,
        profile_id: i64,
        date: NaiveDate,
    ) -> Result<Option<DailyMetric>, CoreError> {
        let row = sqlx::query_as::<_, DailyMetric>(
            "SELECT * FROM daily_metrics WHERE profile_id = ? AND date = ?",
        )
        .bind(profile_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(row)
    }

    /// Most recent DailyMetric row strictly before `date`, searching
    /// backwards past any tracking gap rather than only the literal
    /// previous calendar day.
    pub async fn get_latest_daily_metric_before(
        &self,
        profile_id: i64,
        date: NaiveDate,
    ) -> Result<Option<DailyMetric>, CoreError> {
        let row = sqlx::query_as::<_, DailyMetric>(
            "SELECT * FROM daily_metrics WHERE profile_id = ? AND date < ? \
             ORDER BY date DESC, id DESC LIMIT 1",
        )
        .bind(profile_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(row)
    }

    /// Roll up today's counters. If no row exists yet for `date`, inserts
    /// one using `open` as the opening values (callers use yesterday's
    /// close when a session carries over, otherwise `open == close`).
    /// Otherwise applies `update_daily_metric_for_today`, leaving `open`
    /// untouched.
    pub async fn upsert_daily_metric(
        &self,
        profile_id: i64,
        date: NaiveDate,
        open: DailyMetricFields,
        close: DailyMetricFields,
    ) -> Result<DailyMetric, CoreError> {
        match self.get_daily_metric(profile_id, date).await? {
            Some(_) => self.update_daily_metric_for_today(profile_id, date, close).await,
            None => {
                let now = Utc::now();
                let result = sqlx::query(
                    "INSERT INTO daily_metrics (profile_id, date, followers_open, \
                     followers_close, followers_delta, following_open, following_close, \
                     following_delta, media_open, media_close, media_delta, reels_open, \
                     reels_close, reels_delta, views_delta, likes_delta, comments_delta, \
                     updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(profile_id)
                .bind(date)
                .bind(open.followers)
                .bind(close.followers)
                .bind(close.followers - open.followers)
                .bind(open.following)
                .bind(close.following)
                .bind(close.following - open.following)
                .bind(open.media)
                .bind(close.media)
                .bind(close.media - open.media)
                .bind(open.reels)
                .bind(close.reels)
                .bind(close.reels - open.reels)
                .bind(close.views_delta)
                .bind(close.likes_delta)
                .bind(close.comments_delta)
                .bind(now)
                .execute(&self.pool)
                .await;

                match result {
                    Ok(_) => self
                        .get_daily_metric(profile_id, date)
                        .await?
                        .ok_or_else(|| CoreError::Fatal("daily metric vanished after insert".into())),
                    Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                        self.update_daily_metric_for_today(profile_id, date, close).await
                    }
                    Err(e) => Err(StorageError::from(e).into()),
                }
            }
        }
    }

    /// Update the close/delta fields of today's row. Refuses to touch any
    /// row whose `date` column differs from `date` — a concurrent rollover
    /// past midnight must never retroactively mutate yesterday's row.
    pub async fn update_daily_metric_for_today(
        &self,
        profile_id: i64,
        date: NaiveDate,
        fields: DailyMetricFields,
    ) -> Result<DailyMetric, CoreError> {
        let existing = self
            .get_daily_metric(profile_id, date)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("daily metric {profile_id}/{date}")))?;

        let now = Utc::now();
        sqlx::query(
            "UPDATE daily_metrics SET followers_close = ?, followers_delta = ?, \
             following_close = ?, following_delta = ?, media_close = ?, media_delta = ?, \
             reels_close = ?, reels_delta = ?, views_delta = views_delta + ?, \
             likes_delta = likes_delta + ?, comments_delta = comments_delta + ?, \
             updated_at = ? WHERE profile_id = ? AND date = ?",
        )
        .bind(fields.followers)
        .bind(fields.followers - existing.followers_open)
        .bind(fields.following)
        .bind(fields.following - existing.following_open)
        .bind(fields.media)
        .bind(fields.media - existing.media_open)
        .bind(fields.reels)
        .bind(fields.reels - existing.reels_open)
        .bind(fields.views_delta)
        .bind(fields.likes_delta)
        .bind(fields.comments_delta)
        .bind(now)
        .bind(profile_id)
        .bind(date)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;

        self.get_daily_metric(profile_id, date)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("daily metric {profile_id}/{date}")))
    }

    pub async fn insert_tweet_reply(
        &self,
        profile_id: i64,
        tweet_id: &str,
        reply: &crate::scraper::Reply,
    ) -> Result<bool, CoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO tweet_replies (profile_id, tweet_id, reply_tweet_id, author_handle, \
             body, posted_at, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(profile_id)
        .bind(tweet_id)
        .bind(&reply.reply_tweet_id)
        .bind(&reply.author_handle)
        .bind(&reply.body)
        .bind(reply.posted_at)
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Ok(false),
            Err(e) => Err(StorageError::from(e).into()),
        }
    }

    /// Most recent Snapshot within `profile`'s current session (§4.6/§7's
    /// session-scoped read): everything captured at or after
    /// `profile.updated_at - ε`.
    pub async fn get_latest_session_snapshot(
        &self,
        profile: &Profile,
    ) -> Result<Option<Snapshot>, CoreError> {
        Ok(self
            .get_snapshots_since(profile.id, session_start(profile.updated_at))
            .await?
            .into_iter()
            .last())
    }

    /// Most recent Delta row within `profile`'s current session, if any.
    pub async fn get_latest_session_delta(&self, profile: &Profile) -> Result<Option<Delta>, CoreError> {
        let row = sqlx::query_as::<_, Delta>(
            "SELECT * FROM deltas WHERE profile_id = ? AND created_at >= ? \
             ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(profile.id)
        .bind(session_start(profile.updated_at))
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(row)
    }

    /// Most recent DailyMetric row within `profile`'s current session, if
    /// any.
    pub async fn get_latest_session_daily_metric(
        &self,
        profile: &Profile,
    ) -> Result<Option<DailyMetric>, CoreError> {
        let row = sqlx::query_as::<_, DailyMetric>(
            "SELECT * FROM daily_metrics WHERE profile_id = ? AND updated_at >= ? \
             ORDER BY updated_at DESC, id DESC LIMIT 1",
        )
        .bind(profile.id)
        .bind(session_start(profile.updated_at))
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(row)
    }

    pub async fn list_all_profiles(&self) -> Result<Vec<Profile>, CoreError> {
        let rows = sqlx::query_as::<_, Profile>("SELECT * FROM profiles ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(rows)
    }
}

#[async_trait::async_trait]
impl ProfileSource for StoreGateway {
    async fn list_all_targets(&self) -> Result<Vec<TargetKey>, CoreError> {
        let profiles = self.list_all_profiles().await?;
        Ok(profiles
            .into_iter()
            .filter_map(|p| {
                let platform = match p.platform.as_str() {
                    "instagram" => Some(Platform::Instagram),
                    "twitter" => Some(Platform::Twitter),
                    _ => None,
                };
                platform.map(|platform| TargetKey {
                    platform,
                    username: p.username,
                })
            })
            .collect())
    }
}

/// Snapshot row, kept separate from the `sqlx::FromRow`-derived model
/// because `raw_payload` round-trips through `TEXT` rather than a native
/// JSON column.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Snapshot {
    pub id: i64,
    pub profile_id: i64,
    pub followers: i64,
    pub following: i64,
    pub media_count: i64,
    pub reel_count: i64,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub raw_payload: JsonValue,
    pub captured_at: DateTime<Utc>,
}

/// The session-scoped read boundary for a Profile: `updated_at - ε`, where
/// ε absorbs the clock skew between the session-open write and the first
/// Snapshot written immediately after it.
fn session_start(updated_at: DateTime<Utc>) -> DateTime<Utc> {
    updated_at - ChronoDuration::seconds(1)
}

fn row_to_snapshot(row: &sqlx::sqlite::SqliteRow) -> Result<Snapshot, CoreError> {
    let raw_text: String = row.try_get("raw_payload").map_err(StorageError::from)?;
    let raw_payload = serde_json::from_str(&raw_text)
        .map_err(|e| CoreError::Parse(format!("corrupt raw_payload: {e}")))?;
    Ok(Snapshot {
        id: row.try_get("id").map_err(StorageError::from)?,
        profile_id: row.try_get("profile_id").map_err(StorageError::from)?,
        followers: row.try_get("followers").map_err(StorageError::from)?,
        following: row.try_get("following").map_err(StorageError::from)?,
        media_count: row.try_get("media_count").map_err(StorageError::from)?,
        reel_count: row.try_get("reel_count").map_err(StorageError::from)?,
        bio: row.try_get("bio").map_err(StorageError::from)?,
        avatar_url: row.try_get("avatar_url").map_err(StorageError::from)?,
        raw_payload,
        captured_at: row.try_get("captured_at").map_err(StorageError::from)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::init_test_db;

    fn identity(username: &str) -> ProfileIdentity {
        ProfileIdentity {
            platform: Platform::Instagram,
            username: username.to_string(),
            external_account_id: format!("ext-{username}"),
            display_name: username.to_string(),
            avatar_url: None,
            bio: None,
            external_link: None,
            owning_user_id: Some("user-1".to_string()),
            tracking_id: None,
        }
    }

    #[tokio::test]
    async fn resolve_profile_creates_then_reuses_by_tracking_id() {
        let pool = init_test_db().await;
        let gateway = StoreGateway::new(pool);

        let first = gateway.resolve_profile(identity("alice")).await.unwrap();
        assert!(!first.tracking_id.is_empty());

        let mut by_tracking = identity("alice");
        by_tracking.tracking_id = Some(first.tracking_id.clone());
        let second = gateway.resolve_profile(by_tracking).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn resolve_profile_scopes_by_owning_user() {
        let pool = init_test_db().await;
        let gateway = StoreGateway::new(pool);

        let mut a = identity("shared");
        a.owning_user_id = Some("user-a".to_string());
        let mut b = identity("shared");
        b.owning_user_id = Some("user-b".to_string());

        let profile_a = gateway.resolve_profile(a).await.unwrap();
        let profile_b = gateway.resolve_profile(b).await.unwrap();
        assert_ne!(profile_a.id, profile_b.id);
    }

    #[tokio::test]
    async fn baseline_uses_second_most_recent_snapshot() {
        let pool = init_test_db().await;
        let gateway = StoreGateway::new(pool);
        let profile = gateway.resolve_profile(identity("carol")).await.unwrap();

        for followers in [100, 110, 125] {
            gateway
                .insert_snapshot(NewSnapshot {
                    profile_id: profile.id,
                    followers,
                    following: 10,
                    media_count: 5,
                    reel_count: 1,
                    bio: None,
                    avatar_url: None,
                    raw_payload: serde_json::json!({}),
                    captured_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let recent = gateway.get_recent_snapshots(profile.id, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].followers, 125);
        assert_eq!(recent[1].followers, 110);
    }

    #[tokio::test]
    async fn update_daily_metric_for_today_refuses_stale_date() {
        let pool = init_test_db().await;
        let gateway = StoreGateway::new(pool);
        let profile = gateway.resolve_profile(identity("dave")).await.unwrap();
        let yesterday = Utc::now().date_naive().pred_opt().unwrap();

        let result = gateway
            .update_daily_metric_for_today(
                profile.id,
                yesterday,
                DailyMetricFields {
                    followers: 1,
                    following: 1,
                    media: 1,
                    reels: 1,
                    views_delta: 0,
                    likes_delta: 0,
                    comments_delta: 0,
                },
            )
            .await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn reel_refresh_clamps_negative_deltas_to_zero() {
        let pool = init_test_db().await;
        let gateway = StoreGateway::new(pool);
        let profile = gateway.resolve_profile(identity("erin")).await.unwrap();

        let reel = gateway
            .upsert_new_reel(NewReel {
                profile_id: profile.id,
                shortcode: "abc123".to_string(),
                views: 1000,
                likes: 50,
                comments: 4,
                reply_count: None,
                source_url: None,
                mirrored_url: None,
                is_video: true,
                taken_at: Utc::now(),
            })
            .await
            .unwrap();

        let refreshed = gateway
            .refresh_reel(
                reel.id,
                ReelRefresh {
                    views: 900,
                    likes: 60,
                    comments: 4,
                    reply_count: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(refreshed.views_delta, 0);
        assert_eq!(refreshed.likes_delta, 10);
        assert_eq!(refreshed.comments_delta, 0);
    }
}
