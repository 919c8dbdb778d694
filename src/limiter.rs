//! Multi-level token-bucket admission control.
//!
//! Mirrors `limiter/limiter.go`'s `RateLimiter` interface and `multiLimiter`:
//! a composite limiter aggregates sub-limiters sorted ascending by rate and
//! requires every one of them to admit a token before a fetch proceeds.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota};
use tokio_util::sync::CancellationToken;

use crate::error::LimiterError;

/// Capability: wait for an admission token, and report the configured rate
/// (events/second) so a [`CompositeLimiter`] can order sub-limiters.
///
/// `wait` races the token acquisition against `cancel` so a shutdown in
/// progress doesn't leave a worker parked indefinitely on a slow bucket.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn wait(&self, cancel: &CancellationToken) -> Result<(), LimiterError>;
    fn limit(&self) -> f64;
}

/// `event_count` events evenly spaced over `duration`, expressed as events/second.
///
/// Equivalent to the source's `limiter.Per(eventCount, duration)`.
pub fn per(event_count: u32, duration: Duration) -> f64 {
    event_count as f64 / duration.as_secs_f64()
}

/// A single token-bucket sub-limiter backed by `governor`.
pub struct TokenBucketLimiter {
    limit_per_sec: f64,
    inner: DefaultDirectRateLimiter,
}

impl TokenBucketLimiter {
    /// `event_count` events admitted per `duration`.
    pub fn new(event_count: u32, duration: Duration) -> Self {
        let limit_per_sec = per(event_count, duration);
        let per_event = duration / event_count.max(1);
        let quota = Quota::with_period(per_event)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::new(1).unwrap()))
            .allow_burst(NonZeroU32::new(event_count.max(1)).unwrap());
        Self {
            limit_per_sec,
            inner: DefaultDirectRateLimiter::direct(quota),
        }
    }
}

#[async_trait]
impl RateLimiter for TokenBucketLimiter {
    async fn wait(&self, cancel: &CancellationToken) -> Result<(), LimiterError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(LimiterError::Cancelled),
            _ = self.inner.until_ready() => Ok(()),
        }
    }

    fn limit(&self) -> f64 {
        self.limit_per_sec
    }
}

/// Aggregate of N sub-limiters; `wait` acquires from each in ascending-rate
/// order and fails immediately (without returning already-acquired tokens)
/// if any sub-limiter errors.
pub struct CompositeLimiter {
    limiters: Vec<Arc<dyn RateLimiter>>,
}

impl CompositeLimiter {
    pub fn new(mut limiters: Vec<Arc<dyn RateLimiter>>) -> Self {
        limiters.sort_by(|a, b| a.limit().partial_cmp(&b.limit()).unwrap());
        Self { limiters }
    }
}

#[async_trait]
impl RateLimiter for CompositeLimiter {
    async fn wait(&self, cancel: &CancellationToken) -> Result<(), LimiterError> {
        for limiter in &self.limiters {
            limiter.wait(cancel).await?;
        }
        Ok(())
    }

    fn limit(&self) -> f64 {
        self.limiters
            .first()
            .map(|l| l.limit())
            .unwrap_or(f64::INFINITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_computes_events_per_second() {
        assert!((per(2, Duration::from_secs(1)) - 2.0).abs() < 1e-9);
        assert!((per(20, Duration::from_secs(60)) - (20.0 / 60.0)).abs() < 1e-9);
    }

    #[test]
    fn composite_limit_is_the_smallest_sub_limiter() {
        let fast = Arc::new(TokenBucketLimiter::new(2, Duration::from_secs(1)));
        let slow = Arc::new(TokenBucketLimiter::new(20, Duration::from_secs(60)));
        let composite = CompositeLimiter::new(vec![fast.clone(), slow.clone()]);
        assert!((composite.limit() - slow.limit()).abs() < 1e-9);
    }

    #[tokio::test]
    async fn composite_wait_acquires_from_every_sub_limiter() {
        let a = Arc::new(TokenBucketLimiter::new(100, Duration::from_secs(1)));
        let b = Arc::new(TokenBucketLimiter::new(100, Duration::from_secs(1)));
        let composite = CompositeLimiter::new(vec![a, b]);
        composite.wait(&CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn wait_is_cancelled_by_an_already_cancelled_token() {
        let limiter = TokenBucketLimiter::new(1, Duration::from_secs(3600));
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(limiter.wait(&cancel).await, Err(LimiterError::Cancelled)));
    }
}
