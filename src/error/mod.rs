use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Result type for dashboard operations
pub type Result<T> = std::result::Result<T, DashboardError>;

/// Dashboard error types
#[derive(Error, Debug)]
pub enum DashboardError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Circuit breaker open for upstream: {0}")]
    CircuitOpen(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Failed to map {source_label} payload: {message}")]
    Mapping {
        source_label: String,
        message: String,
    },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classification of a failed upstream call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorCode {
    /// The attempt exceeded its deadline
    Timeout,
    /// The upstream answered with a non-2xx status
    Status,
    /// Connection or transport failure, no status received
    Network,
    /// The upstream answered 2xx but the body could not be decoded
    Decode,
}

impl std::fmt::Display for FetchErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchErrorCode::Timeout => write!(f, "timeout"),
            FetchErrorCode::Status => write!(f, "status"),
            FetchErrorCode::Network => write!(f, "network"),
            FetchErrorCode::Decode => write!(f, "decode"),
        }
    }
}

/// Error returned by the resilient HTTP client once it gives up
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct FetchError {
    pub status: Option<u16>,
    pub code: FetchErrorCode,
    pub message: String,
}

impl FetchError {
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: FetchErrorCode::Timeout,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: FetchErrorCode::Network,
            message: message.into(),
        }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code: FetchErrorCode::Status,
            message: message.into(),
        }
    }

    pub fn decode(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code: FetchErrorCode::Decode,
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.code == FetchErrorCode::Timeout
    }

    /// Timeouts, 5xx answers and failures without any status are worth retrying.
    /// A 4xx (or an undecodable 2xx) is final.
    pub fn is_retryable(&self) -> bool {
        let is_5xx = matches!(self.status, Some(s) if (500..600).contains(&s));
        self.is_timeout() || is_5xx || self.status.is_none()
    }
}

impl DashboardError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            DashboardError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DashboardError::CircuitOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
            DashboardError::Fetch(e) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            DashboardError::Fetch(_) => StatusCode::BAD_GATEWAY,
            DashboardError::Mapping { .. } => StatusCode::BAD_GATEWAY,
            DashboardError::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DashboardError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DashboardError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DashboardError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DashboardError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
