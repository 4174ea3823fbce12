//! Shared application state for the profilewatch server.

use std::sync::Arc;

use profilewatch_core::cookiepool::CookiePool;
use profilewatch_core::pipeline::{PipelineOutput, TrackingPipeline};
use profilewatch_core::queue::Queue;
use profilewatch_core::scheduler::Scheduler;
use profilewatch_core::scraper::{CookieRotatingScraper, HttpTransport};
use profilewatch_core::storage::StoreGateway;

/// The concrete scraper stack wired in by the binary: cookie rotation and
/// bounded retry (core) around a reqwest transport (pluggable per §4.2).
pub type Scraper = CookieRotatingScraper<HttpTransport>;
/// The concrete tracking pipeline, dispatched by the Queue.
pub type Pipeline = TrackingPipeline<Scraper>;
/// The process-wide job queue.
pub type AppQueue = Queue<PipelineOutput, Pipeline>;
/// The cron scheduler driving the queue.
pub type AppScheduler = Scheduler<StoreGateway, Arc<AppQueue>>;

/// Shared application state accessible by all route handlers.
pub struct AppState {
    pub gateway: Arc<StoreGateway>,
    pub queue: Arc<AppQueue>,
    pub scheduler: Arc<AppScheduler>,
    pub cookie_pool: Arc<CookiePool>,
}
