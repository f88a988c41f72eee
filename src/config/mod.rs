use crate::cache::CacheConfig;
use crate::circuit_breaker::{CircuitBreakerConfig, RetryConfig};
use crate::error::{DashboardError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable that selects the shared Redis cache
pub const REDIS_URL_ENV: &str = "REDIS_URL";

/// Environment variable that overrides the listen port
pub const PORT_ENV: &str = "PORT";

/// Main service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Cache backend selection
    #[serde(default)]
    pub cache: CacheConfig,
    /// Circuit breaker thresholds, shared by every upstream
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    /// Per-attempt timeout and retry budget
    #[serde(default)]
    pub retry: RetryConfig,
    /// Upstream endpoints
    #[serde(default)]
    pub sources: SourcesConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

/// One upstream endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// URL fetched with GET
    pub url: String,
    /// How long mapped results stay cached, in milliseconds
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
}

impl SourceConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ttl_ms: default_ttl_ms(),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// The three dashboard upstreams
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default = "default_coffees")]
    pub coffees: SourceConfig,
    #[serde(default = "default_beers")]
    pub beers: SourceConfig,
    #[serde(default = "default_characters")]
    pub characters: SourceConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_ttl_ms() -> u64 {
    60_000
}

fn default_coffees() -> SourceConfig {
    SourceConfig::new("https://api.sampleapis.com/coffee/hot")
}

fn default_beers() -> SourceConfig {
    SourceConfig::new("https://api.sampleapis.com/beers/ale")
}

fn default_characters() -> SourceConfig {
    SourceConfig::new("https://api.sampleapis.com/futurama/characters")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            coffees: default_coffees(),
            beers: default_beers(),
            characters: default_characters(),
        }
    }
}

impl SourcesConfig {
    /// Every source with its label
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &SourceConfig)> {
        [
            ("coffees", &self.coffees),
            ("beers", &self.beers),
            ("characters", &self.characters),
        ]
        .into_iter()
    }
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DashboardError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| DashboardError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`; empty values are ignored
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(REDIS_URL_ENV).filter(|url| !url.trim().is_empty()) {
            self.cache.redis_url = Some(url);
        }

        if let Some(port) = lookup(PORT_ENV).filter(|port| !port.trim().is_empty()) {
            self.server.port = port.trim().parse().map_err(|e| {
                DashboardError::Config(format!("Invalid {} value '{}': {}", PORT_ENV, port, e))
            })?;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(DashboardError::Config(
                "circuit_breaker.failure_threshold must be > 0".to_string(),
            ));
        }
        if self.circuit_breaker.open_duration_ms == 0 {
            return Err(DashboardError::Config(
                "circuit_breaker.open_duration_ms must be > 0".to_string(),
            ));
        }
        if self.circuit_breaker.half_open_requests == 0 {
            return Err(DashboardError::Config(
                "circuit_breaker.half_open_requests must be > 0".to_string(),
            ));
        }
        if self.retry.attempt_timeout_ms == 0 {
            return Err(DashboardError::Config(
                "retry.attempt_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.cache.prefix.is_empty() {
            return Err(DashboardError::Config(
                "cache.prefix cannot be empty".to_string(),
            ));
        }
        if let Some(redis_url) = &self.cache.redis_url {
            url::Url::parse(redis_url).map_err(|e| {
                DashboardError::Config(format!("Invalid cache.redis_url: {}", e))
            })?;
        }

        for (label, source) in self.sources.iter() {
            let parsed = url::Url::parse(&source.url).map_err(|e| {
                DashboardError::Config(format!("Invalid URL for source {}: {}", label, e))
            })?;

            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(DashboardError::Config(format!(
                    "URL must start with http:// or https:// for source: {}",
                    label
                )));
            }

            if source.ttl_ms == 0 {
                return Err(DashboardError::Config(format!(
                    "ttl_ms must be > 0 for source: {}",
                    label
                )));
            }
        }

        Ok(())
    }
}
