//! Rate-limited, priority, deduplicating job queue.
//!
//! A process-wide, single-consumer dispatcher. At most one job runs at a
//! time; consecutive starts are spaced by at least `effectiveSpacing`,
//! which grows exponentially on consecutive `RateLimited` outcomes and
//! resets to the base spacing on the next success, or automatically once
//! an hour has passed since the last `RateLimited` outcome. Jobs that
//! fail with `RateLimited` are transparently re-queued rather than
//! rejected to the caller; every other outcome settles the caller's
//! future.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{watch, Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;
use crate::scraper::Platform;

/// Identifies a scrape target for deduplication purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetKey {
    pub platform: Platform,
    pub username: String,
}

impl std::fmt::Display for TargetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.platform, self.username)
    }
}

/// Everything the executor needs to run one job.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub target: TargetKey,
    pub tracking_id: Option<String>,
    pub user_id: Option<String>,
    pub added_at: Instant,
    pub immediate: bool,
}

/// Dispatches one job to completion. Implemented by the Tracking Pipeline.
#[async_trait]
pub trait JobExecutor<T>: Send + Sync
where
    T: Send + Sync + Clone + 'static,
{
    async fn execute(&self, ctx: &JobContext) -> Result<T, CoreError>;
}

struct JobEntry<T> {
    ctx: JobContext,
    tx: watch::Sender<Option<Result<T, CoreError>>>,
}

/// Consecutive rate-limit errors reset if more than this long has passed
/// since the most recent one — an hour without a 429 means the backoff
/// this run accumulated is stale.
const RATE_LIMIT_ERROR_RESET_AFTER: Duration = Duration::from_secs(3600);

struct QueueState<T> {
    immediate: VecDeque<JobEntry<T>>,
    normal: VecDeque<JobEntry<T>>,
    in_flight: Option<TargetKey>,
    in_flight_tx: Option<watch::Sender<Option<Result<T, CoreError>>>>,
    last_dispatch_start: Option<Instant>,
    consecutive_rate_limit_errors: u32,
    last_rate_limit_error_at: Option<Instant>,
}

impl<T> QueueState<T> {
    /// Find an existing subscription point for `target`: either a pending
    /// entry, or the job currently executing.
    fn find_subscribable(
        &self,
        target: &TargetKey,
    ) -> Option<watch::Receiver<Option<Result<T, CoreError>>>> {
        if self.in_flight.as_ref() == Some(target) {
            if let Some(tx) = &self.in_flight_tx {
                return Some(tx.subscribe());
            }
        }
        self.immediate
            .iter()
            .chain(self.normal.iter())
            .find(|e| &e.ctx.target == target)
            .map(|e| e.tx.subscribe())
    }

    fn len(&self) -> usize {
        self.immediate.len() + self.normal.len()
    }

    fn pending_targets(&self) -> Vec<String> {
        self.immediate
            .iter()
            .chain(self.normal.iter())
            .map(|e| e.ctx.target.to_string())
            .collect()
    }

    fn pop_next(&mut self) -> Option<JobEntry<T>> {
        self.immediate.pop_front().or_else(|| self.normal.pop_front())
    }
}

/// Diagnostic snapshot returned by [`Queue::status`].
#[derive(Debug, Clone)]
pub struct QueueStatus {
    pub size: usize,
    pub in_flight: bool,
    pub in_flight_target: Option<String>,
    pub last_dispatch_at: Option<Instant>,
    pub base_spacing: Duration,
    pub consecutive_rate_limit_errors: u32,
    pub effective_spacing: Duration,
    pub pending_targets: Vec<String>,
}

/// The rate-limited, priority, deduplicating job queue.
pub struct Queue<T, E>
where
    T: Send + Sync + Clone + 'static,
    E: JobExecutor<T> + 'static,
{
    state: Mutex<QueueState<T>>,
    notify: Notify,
    executor: E,
    base_spacing: Duration,
    max_backoff: Duration,
}

impl<T, E> Queue<T, E>
where
    T: Send + Sync + Clone + 'static,
    E: JobExecutor<T> + 'static,
{
    pub fn new(executor: E, base_spacing: Duration, max_backoff: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState {
                immediate: VecDeque::new(),
                normal: VecDeque::new(),
                in_flight: None,
                in_flight_tx: None,
                last_dispatch_start: None,
                consecutive_rate_limit_errors: 0,
                last_rate_limit_error_at: None,
            }),
            notify: Notify::new(),
            executor,
            base_spacing,
            max_backoff,
        })
    }

    /// Add a job for `target`. If a non-completed job for the same target
    /// exists, its future is returned instead (deduplication).
    pub async fn add(
        self: &Arc<Self>,
        target: TargetKey,
        immediate: bool,
        tracking_id: Option<String>,
        user_id: Option<String>,
    ) -> impl Future<Output = Result<T, CoreError>> {
        let mut state = self.state.lock().await;

        if let Some(rx) = state.find_subscribable(&target) {
            drop(state);
            return await_settled(rx);
        }

        let (tx, rx) = watch::channel(None);
        let ctx = JobContext {
            target,
            tracking_id,
            user_id,
            added_at: Instant::now(),
            immediate,
        };
        let was_idle = state.len() == 0 && state.in_flight.is_none();
        if immediate {
            state.immediate.push_back(JobEntry { ctx, tx });
        } else {
            state.normal.push_back(JobEntry { ctx, tx });
        }
        drop(state);

        if was_idle || immediate {
            self.notify.notify_one();
        }

        await_settled(rx)
    }

    /// Diagnostic snapshot.
    pub async fn status(&self) -> QueueStatus {
        let mut state = self.state.lock().await;
        let effective_spacing = self.effective_spacing(&mut state);
        QueueStatus {
            size: state.len(),
            in_flight: state.in_flight.is_some(),
            in_flight_target: state.in_flight.as_ref().map(|t| t.to_string()),
            last_dispatch_at: state.last_dispatch_start,
            base_spacing: self.base_spacing,
            consecutive_rate_limit_errors: state.consecutive_rate_limit_errors,
            effective_spacing,
            pending_targets: state.pending_targets(),
        }
    }

    /// Spacing to wait before the next dispatch. If more than
    /// [`RATE_LIMIT_ERROR_RESET_AFTER`] has passed since the last
    /// `RateLimited` outcome, the accumulated backoff is stale and the
    /// counter resets before this is computed.
    fn effective_spacing(&self, state: &mut QueueState<T>) -> Duration {
        if let Some(last) = state.last_rate_limit_error_at {
            if last.elapsed() > RATE_LIMIT_ERROR_RESET_AFTER {
                state.consecutive_rate_limit_errors = 0;
                state.last_rate_limit_error_at = None;
            }
        }

        if state.consecutive_rate_limit_errors == 0 {
            return self.base_spacing;
        }
        let scaled = self
            .base_spacing
            .saturating_mul(1 << state.consecutive_rate_limit_errors.min(32));
        scaled.min(self.max_backoff).max(self.base_spacing)
    }

    /// Manually kick the dispatcher (used by `POST /queue/process`).
    pub fn kick(&self) {
        self.notify.notify_one();
    }

    /// Run the dispatcher loop until cancelled. Exactly one job runs at a
    /// time; the loop self-paces according to `effective_spacing`.
    pub async fn run_dispatcher(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }

            let wait = {
                let mut state = self.state.lock().await;
                if state.in_flight.is_some() {
                    None
                } else if state.len() == 0 {
                    None
                } else {
                    let spacing = self.effective_spacing(&mut state);
                    match state.last_dispatch_start {
                        Some(last) => {
                            let elapsed = last.elapsed();
                            if elapsed >= spacing {
                                Some(Duration::ZERO)
                            } else {
                                Some(spacing - elapsed)
                            }
                        }
                        None => Some(Duration::ZERO),
                    }
                }
            };

            match wait {
                None => {
                    tokio::select! {
                        () = cancel.cancelled() => return,
                        () = self.notify.notified() => {}
                    }
                    continue;
                }
                Some(d) if d > Duration::ZERO => {
                    tokio::select! {
                        () = cancel.cancelled() => return,
                        () = tokio::time::sleep(d) => {}
                    }
                    continue;
                }
                Some(_) => {}
            }

            self.dispatch_one().await;
        }
    }

    async fn dispatch_one(self: &Arc<Self>) {
        let entry = {
            let mut state = self.state.lock().await;
            let Some(entry) = state.pop_next() else {
                return;
            };
            state.in_flight = Some(entry.ctx.target.clone());
            state.in_flight_tx = Some(entry.tx.clone());
            state.last_dispatch_start = Some(Instant::now());
            entry
        };

        tracing::info!(target = %entry.ctx.target, "dispatching tracking job");
        let result = self.executor.execute(&entry.ctx).await;

        let mut state = self.state.lock().await;
        state.in_flight = None;
        state.in_flight_tx = None;

        match result {
            Err(CoreError::RateLimited { retry_after }) => {
                state.consecutive_rate_limit_errors += 1;
                state.last_rate_limit_error_at = Some(Instant::now());
                tracing::warn!(
                    target = %entry.ctx.target,
                    retry_after = ?retry_after,
                    consecutive = state.consecutive_rate_limit_errors,
                    "job rate limited, re-queueing"
                );
                if entry.ctx.immediate {
                    state.immediate.push_back(entry);
                } else {
                    state.normal.push_back(entry);
                }
                drop(state);
                self.notify.notify_one();
            }
            Ok(value) => {
                state.consecutive_rate_limit_errors = 0;
                state.last_rate_limit_error_at = None;
                drop(state);
                let _ = entry.tx.send(Some(Ok(value)));
            }
            Err(other) => {
                drop(state);
                let _ = entry.tx.send(Some(Err(other)));
            }
        }
    }
}

/// Lets the Scheduler enqueue onto a Queue without awaiting the dispatched
/// Job: `enqueue` fires `add` and spawns a task to drive the returned
/// future to completion, discarding its result.
#[async_trait]
impl<T, E> crate::scheduler::JobEnqueuer for Arc<Queue<T, E>>
where
    T: Send + Sync + Clone + 'static,
    E: JobExecutor<T> + 'static,
{
    async fn enqueue(&self, target: TargetKey) {
        let fut = self.add(target, false, None, None).await;
        tokio::spawn(async move {
            let _ = fut.await;
        });
    }
}

async fn await_settled<T: Clone>(
    mut rx: watch::Receiver<Option<Result<T, CoreError>>>,
) -> Result<T, CoreError> {
    loop {
        if let Some(result) = rx.borrow().clone() {
            return result;
        }
        if rx.changed().await.is_err() {
            return Err(CoreError::Fatal("job sender dropped".to_string()));
        }
    }
}
