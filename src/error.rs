use axum::{http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Application error type covering the proxy surface, the management API
/// and the infrastructure collaborators.
///
/// Per-request errors are converted to HTTP responses and never crash the
/// handler; registry errors surface to the admin caller.
#[derive(Error, Debug)]
pub enum AppError {
    // ===== Proxy surface =====
    #[error("no route matches the requested path")]
    NoRoute,

    #[error("method not supported by the matched endpoint")]
    MethodUnsupported,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("missing or invalid token")]
    Unauthenticated,

    #[error("upstream request failed: {0}")]
    UpstreamUnavailable(String),

    #[error("upstream request timed out: {0}")]
    UpstreamTimeout(String),

    #[error("malformed request body: {0}")]
    BadRequest(String),

    // ===== Registry / management API =====
    #[error("API '{0}' is already tracked on this node")]
    AlreadyTracked(String),

    #[error("API '{0}' not found")]
    NotFound(String),

    // ===== Infrastructure =====
    #[error("Kafka error: {0}")]
    Kafka(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NoRoute | AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::MethodUnsupported => StatusCode::METHOD_NOT_ALLOWED,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            AppError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::AlreadyTracked(_) => StatusCode::CONFLICT,
            AppError::Kafka(_) | AppError::Config(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get the user-facing message (without internal details)
    ///
    /// The proxy-surface literals are part of the gateway contract and must
    /// not change: clients match on them.
    pub fn user_message(&self) -> String {
        match self {
            AppError::NoRoute => "Route is not available".to_string(),
            AppError::MethodUnsupported => "Method is not supported".to_string(),
            AppError::RateLimited => "Too many requests.".to_string(),
            AppError::Unauthenticated => "Missing or invalid token".to_string(),
            AppError::UpstreamUnavailable(_) => "Upstream service is not available".to_string(),
            AppError::UpstreamTimeout(_) => "Upstream service timed out".to_string(),
            AppError::BadRequest(msg) => format!("Bad request: {}", msg),
            AppError::AlreadyTracked(id) => format!("API '{}' is already tracked", id),
            AppError::NotFound(id) => format!("API '{}' not found", id),
            AppError::Kafka(_) | AppError::Config(_) | AppError::Internal(_) => {
                "Internal server error".to_string()
            }
        }
    }

    /// Get error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::NoRoute => "NO_ROUTE",
            AppError::MethodUnsupported => "METHOD_UNSUPPORTED",
            AppError::RateLimited => "RATE_LIMITED",
            AppError::Unauthenticated => "UNAUTHENTICATED",
            AppError::UpstreamUnavailable(_) => "UPSTREAM_ERROR",
            AppError::UpstreamTimeout(_) => "UPSTREAM_TIMEOUT",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::AlreadyTracked(_) => "ALREADY_TRACKED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Kafka(_) => "KAFKA_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Log this error with appropriate level and context
    pub fn log(&self) {
        let status = self.status_code();
        let code = self.error_code();

        if status.is_server_error() {
            tracing::error!(
                error = %self,
                error_code = %code,
                status = %status.as_u16(),
                "Server error occurred"
            );
        } else if status == StatusCode::UNAUTHORIZED {
            tracing::warn!(
                error = %self,
                error_code = %code,
                "Authentication failed"
            );
        } else {
            tracing::debug!(
                error = %self,
                error_code = %code,
                "Client error occurred"
            );
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        self.log();

        let status = self.status_code();
        let body = json!({ "message": self.user_message() });

        (status, axum::Json(body)).into_response()
    }
}

// ============================================================================
// Conversion from common error types
// ============================================================================

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::UpstreamTimeout(err.to_string())
        } else {
            AppError::UpstreamUnavailable(err.to_string())
        }
    }
}

impl From<rdkafka::error::KafkaError> for AppError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        AppError::Kafka(err.to_string())
    }
}
