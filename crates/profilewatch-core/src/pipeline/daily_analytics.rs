//! Daily analytics runner (spec §4.7): independently of any tracking Job,
//! walks all Profiles and materializes/refreshes today's DailyMetric row
//! from whatever Snapshot and Reel history already exists. Obeys the same
//! today-only-update rule as the tracking pipeline's own roll-up step.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};

use crate::error::CoreError;
use crate::storage::gateway::DailyMetricFields;
use crate::storage::models::Profile;
use crate::storage::StoreGateway;

pub struct DailyAnalyticsRunner {
    gateway: Arc<StoreGateway>,
}

impl DailyAnalyticsRunner {
    pub fn new(gateway: Arc<StoreGateway>) -> Self {
        Self { gateway }
    }

    /// Refresh today's DailyMetric row for every tracked Profile. Returns
    /// the number of profiles successfully refreshed; per-profile failures
    /// are logged and skipped.
    pub async fn run_once(&self) -> Result<usize, CoreError> {
        let profiles = self.gateway.list_all_profiles().await?;
        let today = Utc::now().date_naive();
        let mut refreshed = 0;

        for profile in &profiles {
            match self.refresh_profile(profile, today).await {
                Ok(true) => refreshed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(error = %e, profile_id = profile.id, "daily analytics refresh failed");
                }
            }
        }

        Ok(refreshed)
    }

    /// Returns `Ok(true)` if a row was written, `Ok(false)` if there was
    /// nothing to refresh (no Snapshot captured today yet).
    async fn refresh_profile(&self, profile: &Profile, today: NaiveDate) -> Result<bool, CoreError> {
        let profile_id = profile.id;
        let Some(latest) = self
            .gateway
            .get_recent_snapshots(profile_id, 1)
            .await?
            .into_iter()
            .next()
        else {
            return Ok(false);
        };
        if latest.captured_at.date_naive() != today {
            return Ok(false);
        }

        let reels = self.gateway.list_recent_reels(profile_id, 12).await.unwrap_or_default();
        let (mut views_delta, mut likes_delta, mut comments_delta) = (0i64, 0i64, 0i64);
        for reel in &reels {
            if reel.updated_at.date_naive() == today {
                views_delta += reel.views_delta.max(0);
                likes_delta += reel.likes_delta.max(0);
                comments_delta += reel.comments_delta.max(0);
            }
        }

        let close = DailyMetricFields {
            followers: latest.followers,
            following: latest.following,
            media: latest.media_count,
            reels: latest.reel_count,
            views_delta,
            likes_delta,
            comments_delta,
        };

        let today_exists = self.gateway.get_daily_metric(profile_id, today).await?.is_some();
        let session_opened_today = profile.updated_at.date_naive() > today.pred_opt().unwrap_or(today);
        let open = if today_exists || session_opened_today {
            close.clone()
        } else {
            match self.gateway.get_latest_daily_metric_before(profile_id, today).await? {
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

        self.gateway.upsert_daily_metric(profile_id, today, open, close).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::Platform;
    use crate::storage::gateway::{NewSnapshot, ProfileIdentity};

    #[tokio::test]
    async fn refreshes_only_profiles_snapshotted_today() {
        let pool = crate::storage::init_test_db().await;
        let gateway = Arc::new(StoreGateway::new(pool));

        let profile = gateway
            .resolve_profile(ProfileIdentity {
                platform: Platform::Instagram,
                username: "fresh".to_string(),
                external_account_id: "ext".to_string(),
                display_name: "Fresh".to_string(),
                avatar_url: None,
                bio: None,
                external_link: None,
                owning_user_id: None,
                tracking_id: None,
            })
            .await
            .unwrap();

        gateway
            .insert_snapshot(NewSnapshot {
                profile_id: profile.id,
                followers: 42,
                following: 3,
                media_count: 7,
                reel_count: 2,
                bio: None,
                avatar_url: None,
                raw_payload: serde_json::json!({}),
                captured_at: Utc::now(),
            })
            .await
            .unwrap();

        let untracked = gateway
            .resolve_profile(ProfileIdentity {
                platform: Platform::Instagram,
                username: "stale".to_string(),
                external_account_id: "ext2".to_string(),
                display_name: "Stale".to_string(),
                avatar_url: None,
                bio: None,
                external_link: None,
                owning_user_id: None,
                tracking_id: None,
            })
            .await
            .unwrap();

        let runner = DailyAnalyticsRunner::new(gateway.clone());
        let refreshed = runner.run_once().await.unwrap();
        assert_eq!(refreshed, 1);

        let today = Utc::now().date_naive();
        assert!(gateway.get_daily_metric(profile.id, today).await.unwrap().is_some());
        assert!(gateway.get_daily_metric(untracked.id, today).await.unwrap().is_none());
    }
}
