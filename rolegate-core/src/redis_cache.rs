//! Redis-backed shared cache store (feature: `redis`).
//!
//! Lets several processes share one permission snapshot. Each process still
//! keeps its own hydrated copy; `forget` on any of them drops the shared
//! entry so the others rebuild once their local copy is cleared.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use rolegate_rbac::{RbacError, RbacResult};
use std::time::Duration;

use crate::store::CacheStore;

/// Redis cache store configuration.
#[derive(Debug, Clone)]
pub struct RedisCacheConfig {
    /// Redis connection URL (e.g., redis://localhost:6379).
    pub url: String,

    /// Prefix for all keys (default: "rolegate").
    pub key_prefix: String,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            key_prefix: "rolegate".to_string(),
        }
    }
}

/// [`CacheStore`] over a multiplexed Redis connection.
///
/// # Example
///
/// ```rust,no_run
/// use rolegate_core::redis_cache::{RedisCacheConfig, RedisCacheStore};
///
/// # async fn example() -> rolegate_rbac::RbacResult<()> {
/// let cache = RedisCacheStore::connect(RedisCacheConfig::default()).await?;
/// # Ok(())
/// # }
/// ```
pub struct RedisCacheStore {
    conn: MultiplexedConnection,
    config: RedisCacheConfig,
}

impl std::fmt::Debug for RedisCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCacheStore")
            .field("config", &self.config)
            .finish()
    }
}

impl RedisCacheStore {
    /// Connect to Redis.
    pub async fn connect(config: RedisCacheConfig) -> RbacResult<Self> {
        let client = redis::Client::open(config.url.as_str()).map_err(cache_error)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(cache_error)?;

        tracing::info!(prefix = %config.key_prefix, "Connected to Redis cache");
        Ok(Self { conn, config })
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.config.key_prefix, key)
    }
}

fn cache_error(err: redis::RedisError) -> RbacError {
    RbacError::Cache(err.to_string())
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> RbacResult<Option<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await
            .map_err(cache_error)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> RbacResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(self.key(key))
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(cache_error)
    }

    async fn forget(&self, key: &str) -> RbacResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await
            .map_err(cache_error)?;
        Ok(removed > 0)
    }
}
