//! Composite read over the three upstreams.
//!
//! Each source goes through a cached fetch: a fresh cache entry short-circuits
//! the network, a miss fetches through [`ResilientHttpClient`], maps the raw
//! document and writes the mapped records back with the source's TTL.

use crate::aggregator::{join_guarded, spawn_guarded, AggregationRun, ErrorSink, PartialError};
use crate::cache::CacheStore;
use crate::client::ResilientHttpClient;
use crate::config::{SourceConfig, SourcesConfig};
use crate::context::current_request_id;
use crate::error::Result;
use crate::sources::{Beer, Beers, Character, Characters, Coffee, Coffees, UpstreamSource};
use serde::Serialize;
use tracing::{debug, warn};

/// Best-effort dashboard; failed sources are empty and listed in `errors`
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExternalDashboard {
    pub coffees: Vec<Coffee>,
    pub beers: Vec<Beer>,
    pub characters: Vec<Character>,
    pub errors: Vec<PartialError>,
}

/// Cache key for a source label
pub fn cache_key(label: &str) -> String {
    format!("external:{}", label)
}

#[derive(Debug, Clone)]
pub struct DashboardService {
    client: ResilientHttpClient,
    cache: CacheStore,
    sources: SourcesConfig,
}

impl DashboardService {
    pub fn new(client: ResilientHttpClient, cache: CacheStore, sources: SourcesConfig) -> Self {
        Self {
            client,
            cache,
            sources,
        }
    }

    pub fn client(&self) -> &ResilientHttpClient {
        &self.client
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Cached, mapped records for source `S`.
    ///
    /// A failed cache write is logged and the fetched records are still
    /// returned.
    pub async fn cached_fetch<S: UpstreamSource>(&self, source: &SourceConfig) -> Result<Vec<S::Item>> {
        let key = cache_key(S::LABEL);

        if let Some(items) = self.cache.get::<Vec<S::Item>>(&key).await {
            debug!(
                label = S::LABEL,
                key = %key,
                request_id = ?current_request_id(),
                "Serving from cache"
            );
            return Ok(items);
        }

        let raw = self.client.fetch(S::LABEL, &source.url).await?;
        let items = S::map_document(&raw)?;

        if let Err(e) = self.cache.set(&key, &items, source.ttl()).await {
            warn!(
                label = S::LABEL,
                key = %key,
                error = %e,
                request_id = ?current_request_id(),
                "Failed to cache fresh records, returning them uncached"
            );
        }

        Ok(items)
    }

    pub async fn fetch_coffees(&self) -> Result<Vec<Coffee>> {
        self.cached_fetch::<Coffees>(&self.sources.coffees).await
    }

    pub async fn fetch_beers(&self) -> Result<Vec<Beer>> {
        self.cached_fetch::<Beers>(&self.sources.beers).await
    }

    pub async fn fetch_characters(&self) -> Result<Vec<Character>> {
        self.cached_fetch::<Characters>(&self.sources.characters).await
    }

    /// Fetch every source concurrently. Never fails; each failed source is
    /// empty and reported in `errors` in completion order.
    pub async fn external_dashboard(&self) -> ExternalDashboard {
        let errors = ErrorSink::default();
        let run = AggregationRun::start("dashboard", 3);

        let coffees = {
            let service = self.clone();
            spawn_guarded(Coffees::LABEL, async move { service.fetch_coffees().await }, &errors)
        };
        let beers = {
            let service = self.clone();
            spawn_guarded(Beers::LABEL, async move { service.fetch_beers().await }, &errors)
        };
        let characters = {
            let service = self.clone();
            spawn_guarded(
                Characters::LABEL,
                async move { service.fetch_characters().await },
                &errors,
            )
        };

        let (coffees, beers, characters) = tokio::join!(
            join_guarded(Coffees::LABEL, coffees, &errors),
            join_guarded(Beers::LABEL, beers, &errors),
            join_guarded(Characters::LABEL, characters, &errors),
        );

        ExternalDashboard {
            coffees,
            beers,
            characters,
            errors: run.finish(&errors),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry, RetryConfig};
    use serde_json::json;
    use std::time::Duration;

    fn unreachable_sources() -> SourcesConfig {
        SourcesConfig {
            coffees: SourceConfig::new("http://127.0.0.1:9/coffee"),
            beers: SourceConfig::new("http://127.0.0.1:9/beers"),
            characters: SourceConfig::new("http://127.0.0.1:9/characters"),
        }
    }

    fn service(cache: CacheStore) -> DashboardService {
        let breakers = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
        let client = ResilientHttpClient::new(
            breakers,
            RetryConfig {
                max_retries: 0,
                base_backoff_ms: 1,
                attempt_timeout_ms: 200,
            },
        )
        .unwrap();
        DashboardService::new(client, cache, unreachable_sources())
    }

    #[test]
    fn test_cache_key() {
        assert_eq!(cache_key("beers"), "external:beers");
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let cache = CacheStore::local();
        let cached = vec![Coffee {
            id: "1".to_string(),
            title: "Espresso".to_string(),
        }];
        cache
            .set(&cache_key("coffees"), &cached, Duration::from_secs(60))
            .await
            .unwrap();

        let service = service(cache);
        let coffees = service.fetch_coffees().await.unwrap();

        assert_eq!(coffees, cached);
        assert!(service.client().breakers().snapshot("coffees").await.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_upstreams_yield_empty_dashboard() {
        let service = service(CacheStore::local());
        let dashboard = service.external_dashboard().await;

        assert!(dashboard.coffees.is_empty());
        assert!(dashboard.beers.is_empty());
        assert!(dashboard.characters.is_empty());

        let mut failed: Vec<&str> = dashboard.errors.iter().map(|e| e.service.as_str()).collect();
        failed.sort_unstable();
        assert_eq!(failed, vec!["beers", "characters", "coffees"]);
    }

    #[test]
    fn test_dashboard_serializes_null_optionals() {
        let dashboard = ExternalDashboard {
            beers: vec![Beer {
                id: "b".to_string(),
                name: "Pale".to_string(),
                style: None,
            }],
            ..Default::default()
        };

        let value = serde_json::to_value(&dashboard).unwrap();
        assert_eq!(
            value,
            json!({
                "coffees": [],
                "beers": [{ "id": "b", "name": "Pale", "style": null }],
                "characters": [],
                "errors": []
            })
        );
    }
}
