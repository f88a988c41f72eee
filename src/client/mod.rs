use crate::circuit_breaker::{CircuitBreakerRegistry, RetryConfig, RetryExecutor};
use crate::context::current_request_id;
use crate::error::{DashboardError, FetchError, Result};
use crate::metrics;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// HTTP client for read-only upstreams: circuit-gated, time-boxed per attempt
/// and retried with exponential backoff.
#[derive(Debug, Clone)]
pub struct ResilientHttpClient {
    client: reqwest::Client,
    breakers: CircuitBreakerRegistry,
    retry: RetryExecutor,
}

impl ResilientHttpClient {
    pub fn new(breakers: CircuitBreakerRegistry, config: RetryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.attempt_timeout())
            .build()
            .map_err(|e| DashboardError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            breakers,
            retry: RetryExecutor::new(config),
        })
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    /// GET `url` on behalf of upstream `label` and decode the JSON body.
    ///
    /// Fails with `CircuitOpen` without touching the network when the label's
    /// circuit rejects the call. Otherwise exactly one success or failure is
    /// recorded on the circuit, however many attempts were made.
    pub async fn fetch(&self, label: &str, url: &str) -> Result<Value> {
        if !self.breakers.can_proceed(label).await {
            warn!(
                label = %label,
                url = %url,
                request_id = ?current_request_id(),
                "Circuit open, skipping upstream call"
            );
            metrics::record_upstream_fetch(label, "rejected", Duration::ZERO);
            return Err(DashboardError::CircuitOpen(label.to_string()));
        }

        let started = Instant::now();
        let mut attempts = 0;
        let result = self
            .retry
            .execute_with_predicate(
                |attempt| {
                    attempts = attempt + 1;
                    self.attempt(label, url, attempt)
                },
                FetchError::is_retryable,
            )
            .await;

        match result {
            Ok(payload) => {
                self.breakers.record_success(label).await;
                metrics::record_upstream_fetch(label, "success", started.elapsed());
                Ok(payload)
            }
            Err(e) => {
                error!(
                    label = %label,
                    url = %url,
                    attempts,
                    request_id = ?current_request_id(),
                    "Giving up on upstream"
                );
                self.breakers.record_failure(label).await;
                metrics::record_upstream_fetch(label, "failure", started.elapsed());
                Err(e.into())
            }
        }
    }

    async fn attempt(
        &self,
        label: &str,
        url: &str,
        attempt: u32,
    ) -> std::result::Result<Value, FetchError> {
        let max_attempts = self.retry.config().max_attempts();
        let started = Instant::now();
        debug!(
            label = %label,
            attempt = attempt + 1,
            max_attempts,
            url = %url,
            request_id = ?current_request_id(),
            "GET upstream"
        );

        match self.send(url).await {
            Ok((status, payload)) => {
                info!(
                    label = %label,
                    status,
                    duration_ms = started.elapsed().as_millis() as u64,
                    url = %url,
                    request_id = ?current_request_id(),
                    "Upstream OK"
                );
                Ok(payload)
            }
            Err(e) => {
                warn!(
                    label = %label,
                    attempt = attempt + 1,
                    max_attempts,
                    duration_ms = started.elapsed().as_millis() as u64,
                    status = ?e.status,
                    code = %e.code,
                    error = %e.message,
                    request_id = ?current_request_id(),
                    "Upstream attempt failed"
                );
                Err(e)
            }
        }
    }

    async fn send(&self, url: &str) -> std::result::Result<(u16, Value), FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Err(FetchError::status(
                status,
                format!("Request failed with status code {}", status),
            ));
        }

        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        let payload = serde_json::from_slice(&body).map_err(|e| {
            FetchError::decode(status, format!("Invalid JSON in upstream response: {}", e))
        })?;

        Ok((status, payload))
    }

    fn classify(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::timeout(format!(
                "timeout of {}ms exceeded",
                self.retry.config().attempt_timeout_ms
            ))
        } else if let Some(status) = e.status() {
            FetchError::status(status.as_u16(), e.to_string())
        } else {
            FetchError::network(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use crate::error::FetchErrorCode;

    #[tokio::test]
    async fn test_open_circuit_fails_fast() {
        let breakers = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
        for _ in 0..3 {
            breakers.record_failure("coffees").await;
        }
        let client = ResilientHttpClient::new(breakers, RetryConfig::default()).unwrap();

        let started = Instant::now();
        // Nothing listens here; an attempt would fail with a network error.
        let err = client
            .fetch("coffees", "http://127.0.0.1:9/coffee")
            .await
            .unwrap_err();

        assert!(matches!(err, DashboardError::CircuitOpen(ref label) if label == "coffees"));
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(client.breakers().state("coffees").await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let breakers = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
        let client = ResilientHttpClient::new(
            breakers,
            RetryConfig {
                max_retries: 1,
                base_backoff_ms: 5,
                attempt_timeout_ms: 500,
            },
        )
        .unwrap();

        let err = client
            .fetch("beers", "http://127.0.0.1:9/beers")
            .await
            .unwrap_err();

        match err {
            DashboardError::Fetch(e) => {
                assert_eq!(e.code, FetchErrorCode::Network);
                assert_eq!(e.status, None);
            }
            other => panic!("unexpected error: {other}"),
        }
        let snapshot = client.breakers().snapshot("beers").await.unwrap();
        assert_eq!(snapshot.failure_count, 1);
    }
}
