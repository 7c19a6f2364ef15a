//! Shared expiring key-value store.
//!
//! Rate-limit counters, active-token records and login credentials all
//! live here, so every worker process sees the same values. Production
//! runs on Redis; [`MemoryCache`] mirrors the same TTL semantics in-process.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::clock::Clock;
use crate::error::{AppError, Result};

/// A TTL-capable key-value store.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Reads a value, `None` when missing or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes a value that expires after `ttl_secs`.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    /// Removes a key. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Reads an integer counter, 0 when missing.
    async fn count(&self, key: &str) -> Result<i64>;

    /// Increments a counter and returns the new value. The first increment
    /// of a fresh counter starts its `ttl_secs` expiry; later increments
    /// leave the expiry untouched.
    async fn incr_with_ttl(&self, key: &str, ttl_secs: u64) -> Result<i64>;
}

/// Bounds a cache round trip. A timeout or a store failure both surface as
/// [`AppError::ServiceUnavailable`].
pub async fn within<T, F>(limit: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            tracing::error!("❌ Cache {} failed: {}", operation, e);
            Err(AppError::ServiceUnavailable(format!("cache {} failed", operation)))
        }
        Err(_) => {
            tracing::error!("❌ Cache {} timed out after {:?}", operation, limit);
            Err(AppError::ServiceUnavailable(format!("cache {} timed out", operation)))
        }
    }
}

/// Lua script for a windowed counter increment.
///
/// Arguments:
/// - KEYS[1]: Counter key (e.g., `rate_limit:qr_validate:{id}`)
/// - ARGV[1]: Window length in seconds
///
/// Returns the counter value after the increment. A counter without an
/// expiry (fresh, or left behind by an older writer) gets one here, in the
/// same atomic step as the increment.
pub const INCR_WITH_TTL: &str = r#"
local count = redis.call('INCR', KEYS[1])

if redis.call('TTL', KEYS[1]) == -1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end

return count
"#;

/// [`CacheStore`] over a pooled Redis connection.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    incr_script: Script,
}

impl RedisCache {
    /// Creates a new `RedisCache`.
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            incr_script: Script::new(INCR_WITH_TTL),
        }
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = self.conn.clone().get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let _: () = self.conn.clone().set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let _: () = self.conn.clone().del(key).await?;
        Ok(())
    }

    async fn count(&self, key: &str) -> Result<i64> {
        let value: Option<i64> = self.conn.clone().get(key).await?;
        Ok(value.unwrap_or(0))
    }

    async fn incr_with_ttl(&self, key: &str, ttl_secs: u64) -> Result<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = self
            .incr_script
            .key(key)
            .arg(ttl_secs)
            .invoke_async(&mut conn)
            .await?;

        Ok(value)
    }
}

#[derive(Clone, Debug)]
struct Entry {
    value: String,
    expires_at: i64,
}

/// In-process [`CacheStore`] with the same expiry rules as Redis, driven by
/// an injected [`Clock`].
#[derive(Clone)]
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    /// Creates a new, empty `MemoryCache`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    fn live<'a>(&self, entry: Option<&'a Entry>) -> Option<&'a Entry> {
        let now = self.clock.unix_seconds();
        entry.filter(|e| e.expires_at > now)
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().await;
        Ok(self.live(entries.get(key)).map(|e| e.value.clone()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let expires_at = self.clock.unix_seconds() + ttl_secs as i64;
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }

    async fn count(&self, key: &str) -> Result<i64> {
        match self.get(key).await? {
            Some(raw) => raw
                .parse()
                .map_err(|_| AppError::Internal(format!("Cache key {} is not a counter", key))),
            None => Ok(0),
        }
    }

    async fn incr_with_ttl(&self, key: &str, ttl_secs: u64) -> Result<i64> {
        let now = self.clock.unix_seconds();
        let mut entries = self.entries.write().await;

        let current = match entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.clone()),
            _ => None,
        };

        let next = match current {
            Some(entry) => {
                let count: i64 = entry.value.parse().map_err(|_| {
                    AppError::Internal(format!("Cache key {} is not a counter", key))
                })?;
                Entry {
                    value: (count + 1).to_string(),
                    expires_at: entry.expires_at,
                }
            }
            None => Entry {
                value: "1".to_string(),
                expires_at: now + ttl_secs as i64,
            },
        };

        let value = next.value.parse().unwrap_or(1);
        entries.insert(key.to_string(), next);
        Ok(value)
    }
}
