//! Layered settings: built-in defaults, overridden by environment variables,
//! overridden again by CLI flags — the order `clap`'s `env` feature applies
//! on its own, so `CrawlerSettings` stays a plain `clap::Parser` struct.

use std::time::Duration;

use clap::Parser;

use crate::crawler::{CrawlerSettings, DEFAULT_SHORT_BODY_THRESHOLD};

/// CLI/env surface for the `crawler` binary.
#[derive(Debug, Parser)]
#[command(name = "crawler", about = "Rule-driven concurrent web crawler")]
pub struct CliSettings {
    /// Number of concurrent fetch workers.
    #[arg(long, env = "CRAWLER_WORK_COUNT", default_value_t = 4)]
    pub work_count: usize,

    /// Response bodies shorter than this (bytes) are treated as failures.
    #[arg(long, env = "CRAWLER_SHORT_BODY_THRESHOLD", default_value_t = DEFAULT_SHORT_BODY_THRESHOLD)]
    pub short_body_threshold: usize,

    /// Fetch timeout, in milliseconds.
    #[arg(long, env = "CRAWLER_FETCH_TIMEOUT_MS", default_value_t = 10_000)]
    pub fetch_timeout_ms: u64,

    /// Comma-separated proxy URLs to round-robin across. Empty means direct.
    #[arg(long, env = "CRAWLER_PROXIES", value_delimiter = ',')]
    pub proxies: Vec<String>,

    /// MySQL connection string for `SqlStorage`.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Cells buffered before a batch flush to storage.
    #[arg(long, env = "CRAWLER_BATCH_COUNT", default_value_t = 50)]
    pub batch_count: usize,

    /// Events admitted per second by the outermost composite rate limiter.
    #[arg(long, env = "CRAWLER_RATE_PER_SEC", default_value_t = 2.0)]
    pub rate_per_sec: f64,

    /// Task names to seed the crawl with.
    #[arg(long = "task", env = "CRAWLER_TASKS", value_delimiter = ',')]
    pub tasks: Vec<String>,
}

impl CliSettings {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn crawler_settings(&self) -> CrawlerSettings {
        CrawlerSettings {
            work_count: self.work_count,
            short_body_threshold: self.short_body_threshold,
        }
    }
}
