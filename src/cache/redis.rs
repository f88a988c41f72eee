use super::CacheBackend;
use crate::error::{DashboardError, Result};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use std::time::Duration;

/// Redis-backed shared cache.
///
/// Keys are namespaced with a prefix and expire server-side (`PX`), so every
/// process instance pointed at the same database sees the same entries.
#[derive(Clone)]
pub struct RedisCache {
    connection: ConnectionManager,
    prefix: String,
}

impl RedisCache {
    /// Open a managed connection to `redis_url`
    pub async fn connect(redis_url: &str, prefix: String) -> std::result::Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;

        Ok(Self { connection, prefix })
    }

    pub async fn ping(&self) -> std::result::Result<(), redis::RedisError> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

fn redis_error(e: redis::RedisError) -> DashboardError {
    DashboardError::Cache(format!("Redis error: {}", e))
}

#[async_trait]
impl CacheBackend for RedisCache {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        conn.get(self.key(key)).await.map_err(redis_error)
    }

    async fn set_raw(&self, key: &str, payload: String, ttl: Duration) -> Result<()> {
        let mut conn = self.connection.clone();
        // PX rejects 0
        let ttl_ms = ttl.as_millis().max(1) as u64;

        redis::cmd("SET")
            .arg(self.key(key))
            .arg(payload)
            .arg("PX")
            .arg(ttl_ms)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(redis_error)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: i64 = conn.del(self.key(key)).await.map_err(redis_error)?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("FLUSHDB")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(redis_error)
    }
}
