//! Error taxonomy for the crawler core.
//!
//! Each external capability (fetch, storage, rate limiting) gets its own
//! `thiserror` enum so callers can match on failure kind; orchestration code
//! (the `crawler` binary, `Crawler::run`) works in terms of `anyhow::Result`.

use thiserror::Error;

/// Errors raised by a [`crate::fetcher::Fetcher`] implementation.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("response body could not be decoded as text")]
    Decode,

    #[error("proxy list must not be empty")]
    EmptyProxyList,

    #[error("proxy url is invalid: {0}")]
    InvalidProxy(String),
}

/// Errors raised by a [`crate::storage::Storage`] implementation.
#[derive(Debug, Error)]
pub enum StorageError {
    #[cfg(feature = "storage")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("task '{0}' has no registered fields for rule '{1}'")]
    UnknownFields(String, String),
}

/// Errors raised while waiting on a [`crate::limiter::RateLimiter`].
#[derive(Debug, Error)]
pub enum LimiterError {
    #[error("rate limiter wait was cancelled")]
    Cancelled,
}

/// Errors a rule's `root()` or `parse_fn` may return.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule failed: {0}")]
    Failed(String),
}

/// Programmer/config errors surfaced by the scheduler and crawler engine.
#[derive(Debug, Error)]
pub enum CrawlerError {
    #[error("task '{0}' is not registered")]
    UnknownTask(String),

    #[error("task '{0}' has no rule named '{1}'")]
    UnknownRule(String, String),

    #[error("request depth {depth} exceeds task '{task}' max depth {max_depth}")]
    DepthExceeded {
        task: String,
        depth: u32,
        max_depth: u32,
    },
}
