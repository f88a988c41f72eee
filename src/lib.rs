pub mod aggregator;
pub mod cache;
pub mod circuit_breaker;
pub mod client;
pub mod config;
pub mod context;
pub mod dashboard;
pub mod error;
pub mod metrics;
pub mod server;
pub mod sources;

pub use crate::server::{build_app, build_state, run, AppState};

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dashboard_aggregator=debug,tower_http=debug".into()),
        )
        .with_target(false)
        .compact()
        .init();
}
