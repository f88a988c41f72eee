use super::breaker::CircuitBreaker;
use super::types::{CircuitBreakerConfig, CircuitBreakerMetrics, CircuitSnapshot, CircuitState};
use dashmap::DashMap;
use std::sync::Arc;

/// Per-upstream circuit breakers, created lazily by label.
///
/// Built once at startup and shared with every client that needs admission
/// checks. Each label's state is serialized by its own breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerRegistry {
    breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    /// Create a new registry; every label gets the same configuration
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: Arc::new(DashMap::new()),
            config,
        }
    }

    fn get_or_create(&self, label: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(label.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(label.to_string(), self.config.clone())))
            .clone()
    }

    /// Check if a request can proceed for a label
    pub async fn can_proceed(&self, label: &str) -> bool {
        self.get_or_create(label).can_proceed().await
    }

    /// Record a successful request for a label
    pub async fn record_success(&self, label: &str) {
        self.get_or_create(label).record_success().await;
    }

    /// Record a failed request for a label
    pub async fn record_failure(&self, label: &str) {
        self.get_or_create(label).record_failure().await;
    }

    /// State of a label's circuit; unknown labels are closed
    pub async fn state(&self, label: &str) -> CircuitState {
        match self.breaker(label) {
            Some(breaker) => breaker.state().await,
            None => CircuitState::Closed,
        }
    }

    pub async fn snapshot(&self, label: &str) -> Option<CircuitSnapshot> {
        match self.breaker(label) {
            Some(breaker) => Some(breaker.snapshot().await),
            None => None,
        }
    }

    pub async fn metrics(&self, label: &str) -> Option<CircuitBreakerMetrics> {
        match self.breaker(label) {
            Some(breaker) => Some(breaker.metrics().await),
            None => None,
        }
    }

    /// All labels seen so far
    pub fn labels(&self) -> Vec<String> {
        self.breakers.iter().map(|e| e.key().clone()).collect()
    }

    /// Metrics and state for every label
    pub async fn all_metrics(&self) -> Vec<(String, CircuitBreakerMetrics, CircuitState)> {
        // Collect first so no map shard guard is held across an await.
        let breakers: Vec<(String, Arc<CircuitBreaker>)> = self
            .breakers
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut results = Vec::with_capacity(breakers.len());
        for (label, breaker) in breakers {
            results.push((label, breaker.metrics().await, breaker.state().await));
        }
        results
    }

    fn breaker(&self, label: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(label).map(|e| e.value().clone())
    }
}
