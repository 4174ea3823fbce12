//! Credential rotation pool.
//!
//! Holds an ordered list of scraping credentials loaded once at process
//! start. Failures are tracked per credential with a sliding "recent
//! window"; a credential that accumulates too many failures is soft
//! hard-failed (removed from rotation, but never dropped) until a
//! background timer clears it. The state machine mirrors a circuit
//! breaker's failure tracking, but rotates across N independent
//! credentials instead of tripping a single shared breaker.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// A single credential and its failure bookkeeping.
#[derive(Debug, Clone)]
struct CredentialState {
    value: String,
    failure_count: u32,
    last_failure: Option<Instant>,
    hard_failed: bool,
}

impl CredentialState {
    fn new(value: String) -> Self {
        Self {
            value,
            failure_count: 0,
            last_failure: None,
            hard_failed: false,
        }
    }
}

struct Inner {
    credentials: Vec<CredentialState>,
    current: usize,
    last_switch: Instant,
}

/// Diagnostic snapshot of pool state.
#[derive(Debug, Clone)]
pub struct PoolStatus {
    pub total: usize,
    pub current: Option<usize>,
    pub hard_failed: usize,
    pub failure_counts: Vec<u32>,
}

/// Configuration the pool needs at construction time; taken from
/// [`crate::config::CookiesConfig`] by the caller.
#[derive(Debug, Clone, Copy)]
pub struct CookiePoolConfig {
    pub failure_threshold: u32,
    pub reset_window: Duration,
    pub switch_delay: Duration,
}

impl Default for CookiePoolConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_window: Duration::from_secs(3600),
            switch_delay: Duration::from_secs(5),
        }
    }
}

/// Rotates across a fixed set of scraping credentials, tracking failures
/// and soft-hard-failing credentials that exceed the failure threshold.
pub struct CookiePool {
    inner: Mutex<Inner>,
    config: CookiePoolConfig,
}

impl CookiePool {
    /// Build a pool from a non-empty ordered list of credential strings.
    pub fn new(credentials: Vec<String>, config: CookiePoolConfig) -> Self {
        let credentials = credentials.into_iter().map(CredentialState::new).collect();
        Self {
            inner: Mutex::new(Inner {
                credentials,
                current: 0,
                last_switch: Instant::now(),
            }),
            config,
        }
    }

    /// The current active credential, or `None` if the pool is empty or
    /// every credential is hard-failed.
    pub async fn current(&self) -> Option<String> {
        let inner = self.inner.lock().await;
        inner
            .credentials
            .get(inner.current)
            .filter(|c| !c.hard_failed)
            .map(|c| c.value.clone())
    }

    /// Record a failure on the current credential, advance rotation away
    /// from it if it's now hard-failed, and return a suggested wait before
    /// the next attempt.
    pub async fn mark_failure(&self, reason: &str) -> Duration {
        let mut inner = self.inner.lock().await;
        if inner.credentials.is_empty() {
            return self.config.switch_delay;
        }

        let idx = inner.current;
        let now = Instant::now();
        let just_hard_failed = {
            let cred = &mut inner.credentials[idx];
            cred.failure_count += 1;
            cred.last_failure = Some(now);
            let was_hard_failed = cred.hard_failed;
            if cred.failure_count >= self.config.failure_threshold {
                cred.hard_failed = true;
            }
            cred.hard_failed && !was_hard_failed
        };
        if just_hard_failed {
            tracing::warn!(
                credential = %crate::redact::mask_secret(&inner.credentials[idx].value),
                reason,
                "credential hard-failed after exceeding the failure threshold"
            );
        }

        advance_to_next_active(&mut inner);

        let elapsed_since_switch = now.saturating_duration_since(inner.last_switch);
        inner.last_switch = now;

        if elapsed_since_switch >= self.config.switch_delay {
            self.config.switch_delay
        } else {
            self.config.switch_delay - elapsed_since_switch
        }
    }

    /// Clear the failure count on the current credential after a
    /// successful scraper call.
    pub async fn mark_success(&self) {
        let mut inner = self.inner.lock().await;
        let idx = inner.current;
        if let Some(cred) = inner.credentials.get_mut(idx) {
            cred.failure_count = 0;
            cred.last_failure = None;
        }
    }

    /// True when every credential has at least two failures recorded
    /// within the reset window.
    pub async fn all_rate_limited(&self) -> bool {
        let inner = self.inner.lock().await;
        if inner.credentials.is_empty() {
            return false;
        }
        let now = Instant::now();
        inner.credentials.iter().all(|c| {
            c.failure_count >= 2
                && c.last_failure
                    .is_some_and(|t| now.saturating_duration_since(t) < self.config.reset_window)
        })
    }

    /// The maximum, over all credentials, of `reset_window -
    /// time_since_last_failure`. Meaningful only when [`Self::all_rate_limited`]
    /// is true.
    pub async fn retry_after(&self) -> Duration {
        let inner = self.inner.lock().await;
        let now = Instant::now();
        inner
            .credentials
            .iter()
            .filter_map(|c| c.last_failure.map(|t| (c, t)))
            .map(|(_, t)| {
                let since = now.saturating_duration_since(t);
                self.config.reset_window.saturating_sub(since)
            })
            .max()
            .unwrap_or_default()
    }

    /// Diagnostic snapshot.
    pub async fn status(&self) -> PoolStatus {
        let inner = self.inner.lock().await;
        PoolStatus {
            total: inner.credentials.len(),
            current: inner
                .credentials
                .get(inner.current)
                .filter(|c| !c.hard_failed)
                .map(|_| inner.current),
            hard_failed: inner.credentials.iter().filter(|c| c.hard_failed).count(),
            failure_counts: inner.credentials.iter().map(|c| c.failure_count).collect(),
        }
    }

    /// Run the background auto-reset timer until cancelled. Every
    /// `reset_window / 10` (floored at one minute), clears failure state
    /// on any credential whose last failure is older than the reset
    /// window.
    pub async fn run_auto_reset(&self, cancel: CancellationToken) {
        let interval = (self.config.reset_window / 10).max(Duration::from_secs(60));
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("cookie pool auto-reset loop cancelled");
                    return;
                }
                () = tokio::time::sleep(interval) => {}
            }
            self.auto_reset_stale().await;
        }
    }

    async fn auto_reset_stale(&self) {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let window = self.config.reset_window;
        for cred in &mut inner.credentials {
            if let Some(last_failure) = cred.last_failure {
                if now.saturating_duration_since(last_failure) >= window {
                    cred.failure_count = 0;
                    cred.hard_failed = false;
                    cred.last_failure = None;
                }
            }
        }
    }
}

fn advance_to_next_active(inner: &mut Inner) {
    let n = inner.credentials.len();
    if n == 0 {
        return;
    }
    for offset in 1..=n {
        let candidate = (inner.current + offset) % n;
        if !inner.credentials[candidate].hard_failed {
            inner.current = candidate;
            return;
        }
    }
    // every credential is hard-failed; leave current where it is, the
    // caller will observe `current()` returning None.
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(creds: &[&str]) -> CookiePool {
        CookiePool::new(
            creds.iter().map(|s| s.to_string()).collect(),
            CookiePoolConfig {
                failure_threshold: 3,
                reset_window: Duration::from_secs(3600),
                switch_delay: Duration::from_millis(0),
            },
        )
    }

    #[tokio::test]
    async fn current_returns_first_credential() {
        let pool = pool(&["a=1", "b=2"]);
        assert_eq!(pool.current().await, Some("a=1".to_string()));
    }

    #[tokio::test]
    async fn mark_success_clears_failure_count() {
        let pool = pool(&["a=1", "b=2"]);
        pool.mark_failure("rate_limit").await;
        pool.mark_success().await;
        let status = pool.status().await;
        assert_eq!(status.failure_counts[0], 0);
    }

    #[tokio::test]
    async fn failure_increments_only_current_credential() {
        let pool = pool(&["a=1", "b=2", "c=3"]);
        pool.mark_failure("rate_limit").await;
        let status = pool.status().await;
        assert_eq!(status.failure_counts[0], 1);
        assert_eq!(status.failure_counts[1], 0);
        assert_eq!(status.failure_counts[2], 0);
    }

    #[tokio::test]
    async fn hard_fail_after_threshold_advances_rotation() {
        let pool = pool(&["a=1", "b=2"]);
        for _ in 0..3 {
            pool.mark_failure("rate_limit").await;
        }
        // credential a is now hard-failed; rotation should have moved to b.
        assert_eq!(pool.current().await, Some("b=2".to_string()));
    }

    #[tokio::test]
    async fn rotation_never_permanently_drops_a_credential() {
        let pool = pool(&["a=1"]);
        for _ in 0..3 {
            pool.mark_failure("rate_limit").await;
        }
        // only credential, hard-failed: current() is None but still present.
        assert_eq!(pool.current().await, None);
        let status = pool.status().await;
        assert_eq!(status.total, 1);
        assert_eq!(status.hard_failed, 1);
    }

    #[tokio::test]
    async fn all_rate_limited_requires_every_credential_above_threshold() {
        let pool = pool(&["a=1", "b=2"]);
        // Failures rotate the active credential, so two calls land one
        // failure on each of a and b.
        pool.mark_failure("rate_limit").await;
        pool.mark_failure("rate_limit").await;
        assert!(!pool.all_rate_limited().await, "each credential has only one failure so far");

        // Two more calls bring both credentials to two failures each.
        pool.mark_failure("rate_limit").await;
        pool.mark_failure("rate_limit").await;
        assert!(pool.all_rate_limited().await, "both credentials are now at the threshold");
    }

    #[tokio::test]
    async fn auto_reset_clears_stale_failures() {
        let pool = pool(&["a=1"]);
        pool.mark_failure("rate_limit").await;
        {
            let mut inner = pool.inner.lock().await;
            inner.credentials[0].last_failure =
                Some(Instant::now() - Duration::from_secs(7200));
        }
        pool.auto_reset_stale().await;
        let status = pool.status().await;
        assert_eq!(status.failure_counts[0], 0);
        assert_eq!(status.hard_failed, 0);
    }

    #[tokio::test]
    async fn empty_pool_has_no_current() {
        let pool = pool(&[]);
        assert_eq!(pool.current().await, None);
    }
}
