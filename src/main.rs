use dashboard_aggregator::{config::AppConfig, init_tracing, metrics::MetricsService, run};
use std::env;
use std::path::Path;
use std::process;
use tracing::{info, warn};

const DEFAULT_CONFIG_PATH: &str = "config/dashboard.yaml";

#[tokio::main]
async fn main() {
    init_tracing();

    // Get config file path from command line or use default
    let config_path = env::args().nth(1);

    let mut config = match config_path.as_deref() {
        Some(path) => load(path),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => load(DEFAULT_CONFIG_PATH),
        None => {
            warn!("No config file at {}, using defaults", DEFAULT_CONFIG_PATH);
            AppConfig::default()
        }
    };

    if let Err(e) = config.apply_env_overrides() {
        eprintln!("Invalid environment override: {}", e);
        process::exit(1);
    }

    let metrics = match MetricsService::install() {
        Ok(metrics) => Some(metrics),
        Err(e) => {
            warn!(error = %e, "Metrics disabled");
            None
        }
    };

    if let Err(e) = run(config, metrics).await {
        eprintln!("Dashboard aggregator error: {}", e);
        process::exit(1);
    }
}

fn load(path: &str) -> AppConfig {
    match AppConfig::from_file(path) {
        Ok(config) => {
            info!("Loaded configuration from {}", path);
            config
        }
        Err(e) => {
            eprintln!("Failed to load configuration from {}: {}", path, e);
            eprintln!("Usage: dashboard-aggregator [config_file]");
            process::exit(1);
        }
    }
}
