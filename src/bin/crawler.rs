//! Crawler binary: wires CLI/env settings into collaborators and runs the
//! worked `douban_book` demo task to completion or SIGINT.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use rulecrawl::config::CliSettings;
use rulecrawl::crawler::{Crawler, CrawlerSettings as EngineSettings};
use rulecrawl::fetcher::ReqwestFetcher;
use rulecrawl::limiter::{CompositeLimiter, RateLimiter, TokenBucketLimiter};
use rulecrawl::registry::TaskRegistry;
use rulecrawl::rules::douban_book;
use rulecrawl::storage::Storage;
use rulecrawl::task::Collaborators;

#[cfg(feature = "storage")]
use rulecrawl::storage::SqlStorage;
#[cfg(feature = "storage")]
use sqlx::mysql::MySqlPoolOptions;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = CliSettings::parse();

    let registry = TaskRegistry::new();
    registry.register(douban_book::task());

    let tasks = if cli.tasks.is_empty() {
        vec!["douban_book_list".to_string()]
    } else {
        cli.tasks.clone()
    };

    let fetcher: Arc<dyn rulecrawl::fetcher::Fetcher> = Arc::new(ReqwestFetcher::with_proxies(
        cli.fetch_timeout(),
        &cli.proxies,
    )?);

    let storage: Arc<dyn Storage> = build_storage(&cli, &registry).await?;

    let limiter: Arc<dyn RateLimiter> = Arc::new(CompositeLimiter::new(vec![Arc::new(
        TokenBucketLimiter::new(per_event_count(cli.rate_per_sec), std::time::Duration::from_secs(1)),
    )]));

    let collaborators = Collaborators {
        fetcher,
        storage,
        limiter,
    };

    let crawler = Crawler::new(
        registry,
        EngineSettings {
            work_count: cli.work_count,
            short_body_threshold: cli.short_body_threshold,
        },
    );

    let handle = crawler.run(&tasks, collaborators).await;

    tokio::signal::ctrl_c().await?;
    tracing::info!("received shutdown signal, stopping crawl");
    handle.shutdown().await;
    tracing::info!("crawl stopped");

    Ok(())
}

/// `TokenBucketLimiter::new` wants an event count; derive one that, spread
/// over one second, yields roughly `rate_per_sec` events/second.
fn per_event_count(rate_per_sec: f64) -> u32 {
    rate_per_sec.max(1.0).round() as u32
}

#[cfg(feature = "storage")]
async fn build_storage(cli: &CliSettings, registry: &TaskRegistry) -> Result<Arc<dyn Storage>> {
    match &cli.database_url {
        Some(url) => {
            let pool = MySqlPoolOptions::new().max_connections(10).connect(url).await?;
            Ok(Arc::new(SqlStorage::new(pool, registry.clone(), cli.batch_count)))
        }
        None => {
            tracing::warn!("no DATABASE_URL configured, falling back to in-memory storage");
            Ok(Arc::new(rulecrawl::storage::MemoryStorage::new()))
        }
    }
}

#[cfg(not(feature = "storage"))]
async fn build_storage(_cli: &CliSettings, _registry: &TaskRegistry) -> Result<Arc<dyn Storage>> {
    Ok(Arc::new(rulecrawl::storage::MemoryStorage::new()))
}
