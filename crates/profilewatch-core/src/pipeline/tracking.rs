//! The eleven-step tracking run: scrape, resolve identity, snapshot,
//! delta, reel reconciliation, daily roll-up.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::CoreError;
use crate::queue::{JobContext, JobExecutor};
use crate::scraper::{Platform, ScraperClient};
use crate::storage::gateway::{
    DailyMetricFields, NewReel, NewSnapshot, ProfileIdentity, ReelRefresh,
};
use crate::storage::models::Profile;
use crate::storage::{Snapshot, StoreGateway};

use super::ReplyFetcher;

/// What a completed tracking run hands back to the caller: the resolved
/// Profile and the Snapshot just written.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub profile: Profile,
    pub snapshot: Snapshot,
}

/// Runs the eleven-step tracking sequence for one target against a
/// pluggable [`ScraperClient`].
pub struct TrackingPipeline<S: ScraperClient> {
    gateway: Arc<StoreGateway>,
    scraper: Arc<S>,
    reel_window: usize,
    reel_detail_delay: Duration,
}

impl<S: ScraperClient> TrackingPipeline<S> {
    pub fn new(
        gateway: Arc<StoreGateway>,
        scraper: Arc<S>,
        reel_window: usize,
        reel_detail_delay: Duration,
    ) -> Self {
        Self {
            gateway,
            scraper,
            reel_window,
            reel_detail_delay,
        }
    }

    async fn run(&self, ctx: &JobContext) -> Result<PipelineOutput, CoreError> {
        // Step 1: scrape profile. Any failure here aborts the job.
        let profile_data = self
            .scraper
            .fetch_profile(ctx.target.platform, &ctx.target.username)
            .await?;

        // Step 2: resolve the Profile row.
        let identity = ProfileIdentity {
            platform: ctx.target.platform,
            username: ctx.target.username.clone(),
            external_account_id: profile_data.external_id.clone(),
            display_name: profile_data.display_name.clone(),
            avatar_url: profile_data.avatar_url.clone(),
            bio: profile_data.bio.clone(),
            external_link: profile_data.external_link.clone(),
            owning_user_id: ctx.user_id.clone(),
            tracking_id: ctx.tracking_id.clone(),
        };
        let profile = self.gateway.resolve_profile(identity).await?;

        // Step 3: baseline. A caller-supplied tracking-id resets the
        // session: the baseline is null so deltas only compare snapshots
        // taken within this session.
        let baseline = if ctx.tracking_id.is_some() {
            None
        } else {
            let recent = self.gateway.get_recent_snapshots(profile.id, 2).await?;
            match recent.len() {
                0 => None,
                1 => Some(recent.into_iter().next().expect("len checked")),
                _ => Some(recent.into_iter().nth(1).expect("len checked")),
            }
        };

        // Step 4: insert the new Snapshot. Failure here aborts the job.
        let snapshot = self
            .gateway
            .insert_snapshot(NewSnapshot {
                profile_id: profile.id,
                followers: profile_data.followers,
                following: profile_data.following,
                media_count: profile_data.media_count,
                reel_count: profile_data.reel_count,
                bio: profile_data.bio.clone(),
                avatar_url: profile_data.avatar_url.clone(),
                raw_payload: profile_data.raw_payload.clone(),
                captured_at: Utc::now(),
            })
            .await?;

        // Step 5: point the Profile at its latest Snapshot. A failure here
        // is logged and skipped, not fatal — the pipeline never rolls back
        // step 4's write.
        if let Err(e) = self.gateway.touch_last_snapshot(profile.id, snapshot.id).await {
            tracing::warn!(error = %e, profile_id = profile.id, "failed to update last_snapshot_id");
        }

        // Step 6: write the Delta, if a baseline exists. Zero-deltas are
        // still written.
        if let Some(base) = &baseline {
            if let Err(e) = self
                .gateway
                .insert_delta(
                    profile.id,
                    base.id,
                    snapshot.id,
                    snapshot.followers - base.followers,
                    snapshot.following - base.following,
                    snapshot.media_count - base.media_count,
                    snapshot.reel_count - base.reel_count,
                )
                .await
            {
                tracing::warn!(error = %e, profile_id = profile.id, "failed to write delta");
            }
        }

        // Step 7: enumerate current reels, falling back to the
        // profile-embedded list when the dedicated call fails or yields
        // nothing.
        let enumerated = match self
            .scraper
            .list_media_shortcodes(ctx.target.platform, &ctx.target.username)
            .await
        {
            Ok(list) if !list.is_empty() => list,
            Ok(_) => profile_data.embedded_shortcodes.clone(),
            Err(e) => {
                tracing::warn!(error = %e, "shortcode enumeration failed, using embedded list");
                profile_data.embedded_shortcodes.clone()
            }
        };

        if enumerated.is_empty() && profile_data.embedded_shortcodes.is_empty() {
            tracing::info!(profile_id = profile.id, "no reels to reconcile this run");
            return Ok(PipelineOutput { profile, snapshot });
        }

        // Step 8: reconciliation. new = enumerated − persisted; the
        // working set is new shortcodes plus the newest already-tracked
        // ones, refetched, merged, and capped at `reel_window`.
        let persisted = self
            .gateway
            .list_recent_reels(profile.id, self.reel_window as i64)
            .await
            .unwrap_or_default();
        let persisted_codes: HashSet<&str> =
            persisted.iter().map(|r| r.shortcode.as_str()).collect();

        let mut to_fetch: Vec<String> = enumerated
            .iter()
            .filter(|c| !persisted_codes.contains(c.as_str()))
            .cloned()
            .collect();
        for reel in &persisted {
            to_fetch.push(reel.shortcode.clone());
        }
        let mut seen = HashSet::new();
        to_fetch.retain(|c| seen.insert(c.clone()));

        let mut working_set = Vec::new();
        for (i, shortcode) in to_fetch.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.reel_detail_delay).await;
            }
            match self.scraper.fetch_media(ctx.target.platform, shortcode).await {
                Ok(media) => working_set.push(media),
                Err(e) => {
                    tracing::warn!(error = %e, shortcode = %shortcode, "fetch_media failed, skipping reel");
                }
            }
        }
        working_set.sort_by(|a, b| b.taken_at.cmp(&a.taken_at));
        working_set.truncate(self.reel_window);

        // Step 9: per-reel persistence, accumulating clamped-positive
        // deltas into this run's daily growth totals.
        let mut views_growth = 0i64;
        let mut likes_growth = 0i64;
        let mut comments_growth = 0i64;

        for media in &working_set {
            let existing = self
                .gateway
                .get_reel(profile.id, &media.shortcode)
                .await
                .unwrap_or(None);

            let reel = match existing {
                Some(reel) => self
                    .gateway
                    .refresh_reel(
                        reel.id,
                        ReelRefresh {
                            views: media.views,
                            likes: media.likes,
                            comments: media.comments,
                            reply_count: media.reply_count,
                        },
                    )
                    .await
                    .map_err(|e| {
                        tracing::warn!(error = %e, shortcode = %media.shortcode, "failed to refresh reel");
                        e
                    })
                    .ok(),
                None => self
                    .gateway
                    .upsert_new_reel(NewReel {
                        profile_id: profile.id,
                        shortcode: media.shortcode.clone(),
                        views: media.views,
                        likes: media.likes,
                        comments: media.comments,
                        reply_count: media.reply_count,
                        source_url: media.video_url.clone(),
                        mirrored_url: None,
                        is_video: media.is_reel(),
                        taken_at: media.taken_at,
                    })
                    .await
                    .map_err(|e| {
                        tracing::warn!(error = %e, shortcode = %media.shortcode, "failed to upsert reel");
                        e
                    })
                    .ok(),
            };

            let Some(reel) = reel else { continue };

            views_growth += reel.views_delta.max(0);
            likes_growth += reel.likes_delta.max(0);
            comments_growth += reel.comments_delta.max(0);

            if let Err(e) = self
                .gateway
                .insert_reel_metric(reel.id, media.views, media.likes, media.comments)
                .await
            {
                tracing::warn!(error = %e, shortcode = %media.shortcode, "failed to append reel metric");
            }
        }

        // Step 9.5: Twitter reply fetch. Independent of reel reconciliation
        // and read-append only, so a failure here never blocks the roll-up.
        if ctx.target.platform == Platform::Twitter {
            let replies = ReplyFetcher::new(self.gateway.clone(), self.scraper.clone(), self.reel_window);
            if let Err(e) = replies.run_for_profile(profile.id).await {
                tracing::warn!(error = %e, profile_id = profile.id, "reply fetch failed");
            }
        }

        // Step 10: daily roll-up for today's local date.
        let today = Utc::now().date_naive();
        let close = DailyMetricFields {
            followers: snapshot.followers,
            following: snapshot.following,
            media: snapshot.media_count,
            reels: snapshot.reel_count,
            views_delta: views_growth,
            likes_delta: likes_growth,
            comments_delta: comments_growth,
        };

        let today_exists = self
            .gateway
            .get_daily_metric(profile.id, today)
            .await
            .unwrap_or(None)
            .is_some();

        // A session opened today starts fresh (open = close = current)
        // regardless of what an earlier row's close holds; otherwise walk
        // back to the latest known close, which may be more than one day
        // back if tracking had a gap.
        let session_opened_today = profile.updated_at.date_naive() > today.pred_opt().unwrap_or(today);
        let open = if today_exists || session_opened_today {
            close.clone()
        } else {
            match self
                .gateway
                .get_latest_daily_metric_before(profile.id, today)
                .await
                .unwrap_or(None)
            {
                Some(prior) => DailyMetricFields {
                    followers: prior.followers_close,
                    following: prior.following_close,
                    media: prior.media_close,
                    reels: prior.reels_close,
                    views_delta: 0,
                    likes_delta: 0,
                    comments_delta: 0,
                },
                None => close.clone(),
            }
        };

        if let Err(e) = self
            .gateway
            .upsert_daily_metric(profile.id, today, open, close)
            .await
        {
            tracing::warn!(error = %e, profile_id = profile.id, "failed to roll up daily metric");
        }

        // Step 11.
        Ok(PipelineOutput { profile, snapshot })
    }
}

#[async_trait]
impl<S: ScraperClient> JobExecutor<PipelineOutput> for TrackingPipeline<S> {
    async fn execute(&self, ctx: &JobContext) -> Result<PipelineOutput, CoreError> {
        self.run(ctx).await
    }
}
