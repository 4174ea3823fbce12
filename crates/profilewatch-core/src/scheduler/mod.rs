//! Cron-style scheduler: enumerates tracked profiles and enqueues jobs on
//! the daily and optional refresh triggers. Evaluated in a configured
//! named time zone (default Asia/Kolkata).

use std::sync::Arc;

use async_trait::async_trait;
use chrono_tz::Tz;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::error::CoreError;
use crate::pipeline::DailyAnalyticsRunner;
use crate::queue::TargetKey;

/// Supplies the current set of tracked targets. Implemented by the Store
/// Gateway; kept as a trait so the scheduler can be tested without a
/// database.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn list_all_targets(&self) -> Result<Vec<TargetKey>, CoreError>;
}

/// Enqueues a non-immediate job for a target. Implemented by the Queue.
#[async_trait]
pub trait JobEnqueuer: Send + Sync {
    async fn enqueue(&self, target: TargetKey);
}

/// Named firing of a tick, used for diagnostics and `/cron/schedule`.
#[derive(Debug, Clone)]
pub struct TickSummary {
    pub name: &'static str,
    pub enqueued: usize,
}

/// Configured schedule info surfaced by `GET /cron/schedule`.
#[derive(Debug, Clone)]
pub struct ScheduleInfo {
    pub daily_cron: String,
    pub refresh_cron: Option<String>,
    pub timezone: String,
}

/// Drives the daily and refresh cron triggers.
pub struct Scheduler<S, Q>
where
    S: ProfileSource + 'static,
    Q: JobEnqueuer + 'static,
{
    profiles: Arc<S>,
    queue: Arc<Q>,
    daily_cron: String,
    refresh_cron: Option<String>,
    tz: Tz,
    daily_analytics: Option<Arc<DailyAnalyticsRunner>>,
}

impl<S, Q> Scheduler<S, Q>
where
    S: ProfileSource + 'static,
    Q: JobEnqueuer + 'static,
{
    pub fn new(
        profiles: Arc<S>,
        queue: Arc<Q>,
        daily_cron: String,
        refresh_cron: Option<String>,
        tz: Tz,
        daily_analytics: Option<Arc<DailyAnalyticsRunner>>,
    ) -> Self {
        Self {
            profiles,
            queue,
            daily_cron,
            refresh_cron,
            tz,
            daily_analytics,
        }
    }

    /// The daily analytics runner, if one was configured at construction.
    pub fn daily_analytics(&self) -> Option<&Arc<DailyAnalyticsRunner>> {
        self.daily_analytics.as_ref()
    }

    pub fn schedule_info(&self) -> ScheduleInfo {
        ScheduleInfo {
            daily_cron: self.daily_cron.clone(),
            refresh_cron: self.refresh_cron.clone(),
            timezone: self.tz.to_string(),
        }
    }

    /// Enumerate all profiles and enqueue a non-immediate job for each.
    /// Does not wait for job completion; only calls `Queue.add`.
    pub async fn enqueue_all(&self, tick_name: &'static str) -> Result<TickSummary, CoreError> {
        let targets = self.profiles.list_all_targets().await?;
        tracing::info!(tick = tick_name, count = targets.len(), "enumerating tracked profiles");
        for target in &targets {
            self.queue.enqueue(target.clone()).await;
        }
        Ok(TickSummary {
            name: tick_name,
            enqueued: targets.len(),
        })
    }

    /// Start the daily and (if configured) refresh cron jobs against a
    /// `tokio-cron-scheduler` instance. Returns the running scheduler;
    /// the caller owns its lifetime and should call `shutdown` on exit.
    pub async fn start(self: Arc<Self>) -> Result<JobScheduler, CoreError> {
        let sched = JobScheduler::new()
            .await
            .map_err(|e| CoreError::Fatal(format!("failed to init cron scheduler: {e}")))?;

        let daily_self = self.clone();
        let daily_job = Job::new_async_tz(self.daily_cron.as_str(), self.tz, move |_uuid, _lock| {
            let scheduler = daily_self.clone();
            Box::pin(async move {
                match scheduler.enqueue_all("daily").await {
                    Ok(summary) => tracing::info!(enqueued = summary.enqueued, "daily tick complete"),
                    Err(e) => tracing::error!(error = %e, "daily tick failed"),
                }
                if let Some(runner) = &scheduler.daily_analytics {
                    match runner.run_once().await {
                        Ok(refreshed) => {
                            tracing::info!(refreshed, "daily analytics refresh complete");
                        }
                        Err(e) => tracing::error!(error = %e, "daily analytics refresh failed"),
                    }
                }
            })
        })
        .map_err(|e| CoreError::Fatal(format!("failed to build daily cron job: {e}")))?;

        sched
            .add(daily_job)
            .await
            .map_err(|e| CoreError::Fatal(format!("failed to register daily cron job: {e}")))?;

        if let Some(refresh_cron) = &self.refresh_cron {
            let refresh_self = self.clone();
            let refresh_job =
                Job::new_async_tz(refresh_cron.as_str(), self.tz, move |_uuid, _lock| {
                    let scheduler = refresh_self.clone();
                    Box::pin(async move {
                        match scheduler.enqueue_all("refresh").await {
                            Ok(summary) => {
                                tracing::info!(enqueued = summary.enqueued, "refresh tick complete");
                            }
                            Err(e) => tracing::error!(error = %e, "refresh tick failed"),
                        }
                    })
                })
                .map_err(|e| CoreError::Fatal(format!("failed to build refresh cron job: {e}")))?;

            sched
                .add(refresh_job)
                .await
                .map_err(|e| CoreError::Fatal(format!("failed to register refresh cron job: {e}")))?;
        }

        sched
            .start()
            .await
            .map_err(|e| CoreError::Fatal(format!("failed to start cron scheduler: {e}")))?;

        tracing::info!(
            daily_cron = %self.daily_cron,
            refresh_cron = ?self.refresh_cron,
            tz = %self.tz,
            "scheduler started"
        );

        Ok(sched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::Platform;
    use std::sync::Mutex as StdMutex;

    struct FixedProfiles(Vec<TargetKey>);

    #[async_trait]
    impl ProfileSource for FixedProfiles {
        async fn list_all_targets(&self) -> Result<Vec<TargetKey>, CoreError> {
            Ok(self.0.clone())
        }
    }

    struct RecordingQueue(StdMutex<Vec<TargetKey>>);

    #[async_trait]
    impl JobEnqueuer for RecordingQueue {
        async fn enqueue(&self, target: TargetKey) {
            self.0.lock().unwrap().push(target);
        }
    }

    fn target(name: &str) -> TargetKey {
        TargetKey {
            platform: Platform::Instagram,
            username: name.to_string(),
        }
    }

    #[tokio::test]
    async fn enqueue_all_enqueues_every_profile() {
        let profiles = Arc::new(FixedProfiles(vec![target("a"), target("b")]));
        let queue = Arc::new(RecordingQueue(StdMutex::new(Vec::new())));
        let scheduler = Scheduler::new(
            profiles,
            queue.clone(),
            "15 2 * * *".to_string(),
            None,
            Tz::Asia__Kolkata,
            None,
        );

        let summary = scheduler.enqueue_all("daily").await.expect("enqueue");
        assert_eq!(summary.enqueued, 2);
        assert_eq!(queue.0.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn schedule_info_reports_disabled_refresh_as_none() {
        let profiles = Arc::new(FixedProfiles(vec![]));
        let queue = Arc::new(RecordingQueue(StdMutex::new(Vec::new())));
        let scheduler = Scheduler::new(
            profiles,
            queue,
            "15 2 * * *".to_string(),
            None,
            Tz::Asia__Kolkata,
            None,
        );
        let info = scheduler.schedule_info();
        assert!(info.refresh_cron.is_none());
        assert_eq!(info.timezone, "Asia/Kolkata");
    }
}
