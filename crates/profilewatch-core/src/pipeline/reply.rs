//! Twitter reply sub-pipeline (spec §4.7). Tweets are tracked as Reel rows
//! (the entity model's generic media item); a reply fetch targets the
//! top-N most recent ones that carry at least one reply.

use std::sync::Arc;

use crate::error::CoreError;
use crate::scraper::ScraperClient;
use crate::storage::StoreGateway;

/// Fetches and upserts replies for a Profile's recent, reply-bearing
/// tweets. Read-append only: no deltas are computed for replies.
pub struct ReplyFetcher<S: ScraperClient> {
    gateway: Arc<StoreGateway>,
    scraper: Arc<S>,
    top_n: usize,
}

impl<S: ScraperClient> ReplyFetcher<S> {
    pub fn new(gateway: Arc<StoreGateway>, scraper: Arc<S>, top_n: usize) -> Self {
        Self { gateway, scraper, top_n }
    }

    /// Returns the number of new reply rows inserted.
    pub async fn run_for_profile(&self, profile_id: i64) -> Result<usize, CoreError> {
        let reels = self.gateway.list_recent_reels(profile_id, self.top_n as i64).await?;
        let mut inserted = 0;

        for reel in reels.iter().filter(|r| r.reply_count.unwrap_or(0) > 0) {
            let replies = match self.scraper.fetch_replies(&reel.shortcode).await {
                Ok(replies) => replies,
                Err(e) => {
                    tracing::warn!(error = %e, tweet_id = %reel.shortcode, "fetch_replies failed");
                    continue;
                }
            };

            for reply in &replies {
                match self
                    .gateway
                    .insert_tweet_reply(profile_id, &reel.shortcode, reply)
                    .await
                {
                    Ok(true) => inserted += 1,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, tweet_id = %reel.shortcode, "failed to insert tweet reply");
                    }
                }
            }
        }

        Ok(inserted)
    }
}
