use crate::circuit_breaker::CircuitState;
use crate::error::{DashboardError, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Metrics service exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Install the global Prometheus recorder. Call once per process.
    pub fn install() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            DashboardError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        Self::register_metrics();
        info!("Metrics service initialized");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    fn register_metrics() {
        describe_gauge!(
            "dashboard_circuit_state",
            "Circuit breaker state per upstream (0 = closed, 1 = open, 2 = half-open)"
        );
        describe_counter!(
            "dashboard_upstream_requests_total",
            "Upstream fetches by label and outcome"
        );
        describe_histogram!(
            "dashboard_upstream_duration_seconds",
            "Upstream fetch latency including retries"
        );
        describe_counter!("dashboard_cache_hits_total", "Cache hits by backend");
        describe_counter!("dashboard_cache_misses_total", "Cache misses by backend");
        describe_counter!(
            "dashboard_partial_errors_total",
            "Per-source failures contained by the aggregator"
        );
        describe_histogram!(
            "dashboard_aggregation_duration_seconds",
            "Latency of a full fan-out aggregation"
        );

        debug!("All metrics registered with descriptions");
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(service): State<MetricsService>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        service.render(),
    )
        .into_response()
}

pub fn record_circuit_state(label: &str, state: CircuitState) {
    let labels = [("label", label.to_string())];
    gauge!("dashboard_circuit_state", &labels).set(state.as_gauge());
}

/// Record the outcome of one logical upstream fetch
pub fn record_upstream_fetch(label: &str, outcome: &'static str, elapsed: Duration) {
    let labels = [("label", label.to_string()), ("outcome", outcome.to_string())];
    counter!("dashboard_upstream_requests_total", &labels).increment(1);
    histogram!("dashboard_upstream_duration_seconds", &labels).record(elapsed.as_secs_f64());
}

pub fn record_cache_lookup(backend: &'static str, hit: bool) {
    let labels = [("backend", backend.to_string())];
    if hit {
        counter!("dashboard_cache_hits_total", &labels).increment(1);
    } else {
        counter!("dashboard_cache_misses_total", &labels).increment(1);
    }
}

pub fn record_partial_error(label: &str) {
    let labels = [("label", label.to_string())];
    counter!("dashboard_partial_errors_total", &labels).increment(1);
}

pub fn record_aggregation(elapsed: Duration, errors: usize) {
    let labels = [("degraded", (errors > 0).to_string())];
    histogram!("dashboard_aggregation_duration_seconds", &labels).record(elapsed.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_dont_panic() {
        // Without an installed recorder these are no-ops.
        record_circuit_state("coffees", CircuitState::Open);
        record_upstream_fetch("coffees", "success", Duration::from_millis(12));
        record_cache_lookup("local", true);
        record_cache_lookup("redis", false);
        record_partial_error("beers");
        record_aggregation(Duration::from_millis(40), 1);
    }
}
