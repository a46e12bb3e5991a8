//! Token-bucket admission control for costly exchange calls

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::trace;

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum number of tokens the bucket can hold
    pub capacity: f64,
    /// Tokens added per second
    pub refill_rate: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 100.0,
            refill_rate: 10.0,
        }
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket rate limiter.
///
/// Tokens refill proportionally to elapsed time up to the capacity ceiling.
/// `acquire()` never blocks: it returns `false` when no token is available
/// and leaves retry/backoff policy to the caller.
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    bucket: Arc<Mutex<Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let bucket = Bucket {
            tokens: config.capacity,
            last_refill: Instant::now(),
        };
        Self {
            config,
            bucket: Arc::new(Mutex::new(bucket)),
        }
    }

    /// Try to take a single token. Returns `false` immediately if the bucket
    /// is empty.
    pub async fn acquire(&self) -> bool {
        self.acquire_n(1.0).await
    }

    /// Try to take `amount` tokens at once.
    pub async fn acquire_n(&self, amount: f64) -> bool {
        let mut bucket = self.bucket.lock().await;
        Self::refill(&mut bucket, &self.config);

        if bucket.tokens >= amount {
            bucket.tokens -= amount;
            true
        } else {
            trace!(
                available = bucket.tokens,
                requested = amount,
                "rate limit hit"
            );
            false
        }
    }

    /// Current token count after refill, for metrics.
    pub async fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock().await;
        Self::refill(&mut bucket, &self.config);
        bucket.tokens
    }

    fn refill(bucket: &mut Bucket, config: &RateLimitConfig) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill);
        let new_tokens = elapsed.as_secs_f64() * config.refill_rate;
        bucket.tokens = (bucket.tokens + new_tokens).min(config.capacity);
        bucket.last_refill = now;
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(capacity: f64, refill_rate: f64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            capacity,
            refill_rate,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_exhaustion() {
        let limiter = limiter(100.0, 10.0);

        for _ in 0..100 {
            assert!(limiter.acquire().await);
        }
        // 101st call finds an empty bucket
        assert!(!limiter.acquire().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_after_wait() {
        let limiter = limiter(100.0, 10.0);

        for _ in 0..100 {
            assert!(limiter.acquire().await);
        }
        assert!(!limiter.acquire().await);

        tokio::time::advance(Duration::from_secs(1)).await;

        // 10 tokens/s refill rate buys at least 10 more calls
        for _ in 0..10 {
            assert!(limiter.acquire().await);
        }
        assert!(!limiter.acquire().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_caps_at_capacity() {
        let limiter = limiter(5.0, 100.0);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(limiter.available().await, 5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_n() {
        let limiter = limiter(10.0, 1.0);

        assert!(limiter.acquire_n(10.0).await);
        assert!(!limiter.acquire_n(1.0).await);

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(limiter.acquire_n(3.0).await);
    }
}
