//! Tracking Pipeline: the dispatched unit for a Job, which runs the
//! Twitter reply sub-pipeline as one of its own steps, plus the
//! daily-analytics sub-pipeline that runs independently of it.

mod daily_analytics;
mod reply;
mod tracking;

pub use daily_analytics::DailyAnalyticsRunner;
pub use reply::ReplyFetcher;
pub use tracking::{PipelineOutput, TrackingPipeline};
