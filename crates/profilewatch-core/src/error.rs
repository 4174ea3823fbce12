//! Core error taxonomy for the tracking engine.
//!
//! [`CoreError`] is the single error type threaded through the scraper,
//! queue, pipeline, and store gateway. Its variants map directly onto the
//! kinds the scraper classifies failures into: a caller that only cares
//! whether to retry, back off, or give up can match on the kind without
//! inspecting the wrapped message.

use std::time::Duration;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required config field: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("config file not found: {0}")]
    FileNotFound(String),

    #[error("failed to parse config: {0}")]
    ParseError(String),
}

/// Errors raised by the storage layer (the Store Gateway).
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database connection error: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("query error: {0}")]
    Query(#[source] sqlx::Error),

    #[error("uniqueness collision on {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::Conflict(db_err.message().to_string())
            }
            sqlx::Error::RowNotFound => Self::NotFound("row not found".to_string()),
            _ => Self::Query(err),
        }
    }
}

/// The kind of failure a scraper call or a dispatched job terminated with.
///
/// This is the taxonomy the Queue and Tracking Pipeline dispatch on: only
/// [`CoreError::RateLimited`] is transparently retried by the queue; all
/// other kinds resolve the caller's future with a terminal error.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Upstream signaled a rate limit (HTTP 429, a 401 carrying a rate-limit
    /// marker, or a textual "wait a few minutes" match). Carries the
    /// suggested wait before the next attempt.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// The credential itself is bad, independent of rate limiting.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Transient I/O or 5xx, exhausted the scraper's internal retry budget.
    #[error("transient error: {0}")]
    Transient(String),

    /// Upstream response shape no longer matches what the scraper expects.
    #[error("parse error: {0}")]
    Parse(String),

    /// A uniqueness constraint collided on insert and could not be
    /// reconciled by re-reading and updating.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Read-side only: the requested row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unexpected failure; the job aborts.
    #[error("fatal error: {0}")]
    Fatal(String),
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict(msg) => Self::Conflict(msg),
            StorageError::NotFound(msg) => Self::NotFound(msg),
            other => Self::Fatal(other.to_string()),
        }
    }
}

impl From<ConfigError> for CoreError {
    fn from(err: ConfigError) -> Self {
        Self::Fatal(err.to_string())
    }
}

impl CoreError {
    /// Whether the Queue should transparently re-queue the job that
    /// produced this error rather than settling the caller's future.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}
