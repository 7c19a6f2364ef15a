use std::sync::Arc;

use crate::cache::CacheStore;
use crate::error::Result;

/// Default attempts allowed per session within one window.
pub const DEFAULT_MAX_ATTEMPTS: i64 = 5;
/// Default window length in seconds.
pub const DEFAULT_WINDOW_SECS: u64 = 60;

/// Bounded-attempt counter per session, kept in the shared cache.
///
/// The window is fixed, not sliding: it opens on the first attempt and the
/// counter vanishes with its TTL. Under concurrency the count can overshoot
/// `max_attempts` by a few, but every attempt past the cap is denied until
/// the window closes.
#[derive(Clone)]
pub struct RateLimiter {
    cache: Arc<dyn CacheStore>,
    max_attempts: i64,
    window_secs: u64,
}

impl RateLimiter {
    /// Creates a new `RateLimiter`.
    pub fn new(cache: Arc<dyn CacheStore>, max_attempts: i64, window_secs: u64) -> Self {
        Self {
            cache,
            max_attempts,
            window_secs,
        }
    }

    fn key(session_id: i64) -> String {
        format!("rate_limit:qr_validate:{}", session_id)
    }

    /// Records one attempt for `session_id`. Returns `false`, without
    /// counting, once the window's budget is spent.
    pub async fn check_and_increment(&self, session_id: i64) -> Result<bool> {
        let key = Self::key(session_id);

        let attempts = self.cache.count(&key).await?;
        if attempts >= self.max_attempts {
            tracing::debug!(
                "⛔ QR validation budget spent for session {} ({} attempts)",
                session_id,
                attempts
            );
            return Ok(false);
        }

        self.cache.incr_with_ttl(&key, self.window_secs).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{self, MemoryCache};
    use crate::clock::ManualClock;
    use crate::error::AppError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn limiter() -> (RateLimiter, ManualClock) {
        let clock = ManualClock::at(10_000);
        let cache = Arc::new(MemoryCache::new(Arc::new(clock.clone())));
        (
            RateLimiter::new(cache, DEFAULT_MAX_ATTEMPTS, DEFAULT_WINDOW_SECS),
            clock,
        )
    }

    #[tokio::test]
    async fn denies_after_max_attempts() {
        let (limiter, _) = limiter();

        for _ in 0..DEFAULT_MAX_ATTEMPTS {
            assert!(limiter.check_and_increment(42).await.unwrap());
        }
        assert!(!limiter.check_and_increment(42).await.unwrap());
        assert!(!limiter.check_and_increment(42).await.unwrap());
    }

    #[tokio::test]
    async fn sessions_are_counted_independently() {
        let (limiter, _) = limiter();

        for _ in 0..DEFAULT_MAX_ATTEMPTS {
            limiter.check_and_increment(1).await.unwrap();
        }
        assert!(!limiter.check_and_increment(1).await.unwrap());
        assert!(limiter.check_and_increment(2).await.unwrap());
    }

    #[tokio::test]
    async fn budget_resets_when_window_elapses() {
        let (limiter, clock) = limiter();

        for _ in 0..DEFAULT_MAX_ATTEMPTS {
            limiter.check_and_increment(42).await.unwrap();
        }
        assert!(!limiter.check_and_increment(42).await.unwrap());

        clock.advance(DEFAULT_WINDOW_SECS as i64);
        assert!(limiter.check_and_increment(42).await.unwrap());
    }

    /// Counts atomically, then hangs before answering while `stall` is set,
    /// so callers give up after the counter was already written.
    struct HangsAfterCounting {
        inner: MemoryCache,
        stall: AtomicBool,
    }

    #[async_trait]
    impl CacheStore for HangsAfterCounting {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key).await
        }
        async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
            self.inner.set_ex(key, value, ttl_secs).await
        }
        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }
        async fn count(&self, key: &str) -> Result<i64> {
            self.inner.count(key).await
        }
        async fn incr_with_ttl(&self, key: &str, ttl_secs: u64) -> Result<i64> {
            let value = self.inner.incr_with_ttl(key, ttl_secs).await?;
            if self.stall.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok(value)
        }
    }

    #[tokio::test]
    async fn abandoned_increments_still_expire_with_the_window() {
        let clock = ManualClock::at(10_000);
        let store = Arc::new(HangsAfterCounting {
            inner: MemoryCache::new(Arc::new(clock.clone())),
            stall: AtomicBool::new(true),
        });
        let limiter = RateLimiter::new(store.clone(), DEFAULT_MAX_ATTEMPTS, DEFAULT_WINDOW_SECS);

        for _ in 0..DEFAULT_MAX_ATTEMPTS {
            let attempt = cache::within(
                Duration::from_millis(20),
                "rate limit",
                limiter.check_and_increment(42),
            )
            .await;
            assert!(matches!(attempt, Err(AppError::ServiceUnavailable(_))));
        }

        // Every timed-out call was still counted.
        assert!(!limiter.check_and_increment(42).await.unwrap());

        store.stall.store(false, Ordering::SeqCst);
        clock.advance(DEFAULT_WINDOW_SECS as i64);
        assert_eq!(store.count("rate_limit:qr_validate:42").await.unwrap(), 0);
        assert!(limiter.check_and_increment(42).await.unwrap());
    }
}
