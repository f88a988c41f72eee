//! TTL cache with interchangeable backends.
//!
//! [`CacheStore`] is the only type call sites use. It is built once from
//! [`CacheConfig`]: a configured Redis URL selects the shared [`RedisCache`],
//! otherwise the process-local [`LocalCache`] is used. Values are JSON-encoded
//! before they reach a backend; an entry that no longer decodes is purged and
//! reported as a miss.
//!
//! # Example
//!
//! ```rust,no_run
//! use dashboard_aggregator::cache::CacheStore;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let cache = CacheStore::local();
//!     cache.set("greeting", &"hello", Duration::from_secs(60)).await.unwrap();
//!     let value: Option<String> = cache.get("greeting").await;
//!     assert_eq!(value.as_deref(), Some("hello"));
//! }
//! ```

pub mod local;
pub mod redis;

pub use local::LocalCache;
pub use self::redis::RedisCache;

use crate::error::{DashboardError, Result};
use crate::metrics;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Shared Redis backend; the local backend is used when absent
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Namespace prefix for keys written to Redis
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_prefix() -> String {
    "dashboard-cache:".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            prefix: default_prefix(),
        }
    }
}

/// Storage for encoded cache entries
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short backend name for logs and metrics
    fn name(&self) -> &'static str;

    /// Read an unexpired payload
    async fn get_raw(&self, key: &str) -> Result<Option<String>>;

    /// Write a payload that expires after `ttl`
    async fn set_raw(&self, key: &str, payload: String, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Remove every entry the backend can reach
    async fn clear(&self) -> Result<()>;
}

/// Typed TTL cache over a backend selected at construction
#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl CacheStore {
    pub fn with_backend(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// Process-local cache
    pub fn local() -> Self {
        Self::with_backend(Arc::new(LocalCache::new()))
    }

    /// Shared Redis cache
    pub async fn redis(url: &str, prefix: &str) -> Result<Self> {
        let backend = RedisCache::connect(url, prefix.to_string())
            .await
            .map_err(|e| DashboardError::Cache(format!("Failed to connect to Redis: {}", e)))?;
        Ok(Self::with_backend(Arc::new(backend)))
    }

    /// Select the backend from configuration.
    ///
    /// An unreachable Redis falls back to the local cache with a warning.
    pub async fn from_config(config: &CacheConfig) -> Self {
        let Some(url) = config.redis_url.as_deref() else {
            warn!("No Redis URL configured, using in-memory cache only");
            return Self::local();
        };

        info!(prefix = %config.prefix, "Initializing Redis cache backend");
        match RedisCache::connect(url, config.prefix.clone()).await {
            Ok(backend) => match backend.ping().await {
                Ok(()) => {
                    info!("Connected to Redis");
                    Self::with_backend(Arc::new(backend))
                }
                Err(e) => {
                    warn!(error = %e, "Redis ping failed, falling back to in-memory cache");
                    Self::local()
                }
            },
            Err(e) => {
                warn!(error = %e, "Redis connection failed, falling back to in-memory cache");
                Self::local()
            }
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Read a value. Backend errors and undecodable entries are misses; the
    /// latter are deleted.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let backend = self.backend.name();
        let payload = match self.backend.get_raw(key).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                debug!(backend, key, "Cache miss");
                metrics::record_cache_lookup(backend, false);
                return None;
            }
            Err(e) => {
                error!(backend, key, error = %e, "Cache read failed, treating as miss");
                metrics::record_cache_lookup(backend, false);
                return None;
            }
        };

        match serde_json::from_str(&payload) {
            Ok(value) => {
                debug!(backend, key, "Cache hit");
                metrics::record_cache_lookup(backend, true);
                Some(value)
            }
            Err(e) => {
                error!(backend, key, error = %e, "Corrupt cache entry, purging");
                if let Err(e) = self.backend.delete(key).await {
                    error!(backend, key, error = %e, "Failed to purge corrupt cache entry");
                }
                metrics::record_cache_lookup(backend, false);
                None
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let payload = serde_json::to_string(value)
            .map_err(|e| DashboardError::Serialization(format!("Failed to encode cache value: {}", e)))?;

        self.backend.set_raw(key, payload, ttl).await?;
        debug!(
            backend = self.backend.name(),
            key,
            ttl_ms = ttl.as_millis() as u64,
            "Cache set"
        );
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.backend.delete(key).await?;
        debug!(backend = self.backend.name(), key, "Cache delete");
        Ok(())
    }

    /// Remove everything in the backend.
    ///
    /// On Redis this flushes the whole database, including keys written by
    /// other clients or outside the configured prefix.
    pub async fn clear(&self) -> Result<()> {
        self.backend.clear().await?;
        warn!(backend = self.backend.name(), "Cache cleared");
        Ok(())
    }
}
