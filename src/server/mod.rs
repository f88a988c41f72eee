use crate::cache::CacheStore;
use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::client::ResilientHttpClient;
use crate::config::AppConfig;
use crate::context::{RequestContext, REQUEST_ID_HEADER};
use crate::dashboard::{DashboardService, ExternalDashboard};
use crate::error::{DashboardError, Result};
use crate::metrics::{metrics_handler, MetricsService};
use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::{self, Next},
    response::Response,
    routing::get,
    Json, Router,
};
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub dashboard: DashboardService,
    pub metrics: Option<MetricsService>,
}

impl AppState {
    pub fn new(dashboard: DashboardService) -> Self {
        Self {
            dashboard,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsService) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Build the HTTP application
pub fn build_app(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/external/dashboard", get(dashboard_handler))
        .route("/health", get(health_handler))
        .with_state(state.dashboard);

    if let Some(metrics) = state.metrics {
        app = app.merge(
            Router::new()
                .route("/metrics", get(metrics_handler))
                .with_state(metrics),
        );
    }

    app.layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
}

async fn dashboard_handler(State(service): State<DashboardService>) -> Json<ExternalDashboard> {
    Json(service.external_dashboard().await)
}

async fn health_handler() -> &'static str {
    "OK"
}

/// Reuse the caller's `x-request-id` or generate one, make it current for the
/// handler and echo it on the response.
pub async fn request_id_middleware(req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let span = info_span!("request", request_id = %request_id);
    let started = Instant::now();

    let mut response = RequestContext::scope(
        request_id.clone(),
        async move {
            info!(method = %method, path = %path, "IN");
            let response = next.run(req).await;
            info!(
                method = %method,
                path = %path,
                status = response.status().as_u16(),
                duration_ms = started.elapsed().as_millis() as u64,
                "OUT"
            );
            response
        }
        .instrument(span),
    )
    .await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}

/// Wire every component from configuration
pub async fn build_state(config: &AppConfig) -> Result<AppState> {
    let breakers = CircuitBreakerRegistry::new(config.circuit_breaker.clone());
    let client = ResilientHttpClient::new(breakers, config.retry.clone())?;
    let cache = CacheStore::from_config(&config.cache).await;
    info!(backend = cache.backend_name(), "Cache backend selected");

    let dashboard = DashboardService::new(client, cache, config.sources.clone());
    Ok(AppState::new(dashboard))
}

/// Serve until the process is stopped
pub async fn run(config: AppConfig, metrics: Option<MetricsService>) -> Result<()> {
    config.validate()?;

    info!("Starting dashboard aggregator");
    let mut state = build_state(&config).await?;
    if let Some(metrics) = metrics {
        state = state.with_metrics(metrics);
    }

    let app = build_app(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(DashboardError::Io)?;

    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| DashboardError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}
