use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error types with appropriate HTTP status codes.
///
/// # Security Rejections
///
/// The rejection variants produced by the request pipeline are expected,
/// user-facing outcomes rather than faults:
///
/// - `RateLimitExceeded` - 429 with `Retry-After`
/// - `CsrfMissing` / `CsrfInvalid` - 403 with a generic body (no oracle)
/// - `CorsViolation` - 403, only ever produced in production
///
/// They are recorded as security events by the middleware, not logged as errors.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("CSRF token missing")]
    CsrfMissing,

    #[error("CSRF token invalid")]
    CsrfInvalid,

    #[error("Origin not allowed: {0}")]
    CorsViolation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status code this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::ConfigError(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::CsrfMissing
            | AppError::CsrfInvalid
            | AppError::CorsViolation(_)
            | AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::SerializationError(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    /// Whether this error is an expected security rejection rather than a fault.
    fn is_rejection(&self) -> bool {
        matches!(
            self,
            AppError::RateLimitExceeded { .. }
                | AppError::CsrfMissing
                | AppError::CsrfInvalid
                | AppError::CorsViolation(_)
                | AppError::Unauthorized(_)
                | AppError::Forbidden(_)
        )
    }
}

/// Error response body for API endpoints.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Rejections are reported through security events by the caller.
        // Everything else is a fault and gets logged here with full detail.
        if self.is_rejection() {
            tracing::debug!(error = %self, "Request rejected");
        } else if self.status().is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::warn!(error = %self, "Bad request");
        }

        let status = self.status();
        let (error_type, message) = match &self {
            AppError::ConfigError(_) => (
                "config_error",
                "Service configuration error. Please contact support.".to_string(),
            ),
            AppError::Internal(_) => (
                "internal_error",
                "An internal error occurred. Please contact support if the issue persists."
                    .to_string(),
            ),
            AppError::RateLimitExceeded { .. } => (
                "too_many_requests",
                "Rate limit exceeded. Please retry later.".to_string(),
            ),
            AppError::CsrfMissing => ("csrf_token_missing", "CSRF token missing".to_string()),
            AppError::CsrfInvalid => ("csrf_token_invalid", "Invalid CSRF token".to_string()),
            AppError::CorsViolation(_) => ("cors_rejected", "Origin not allowed".to_string()),
            AppError::Unauthorized(msg) => ("unauthorized", msg.clone()),
            AppError::Forbidden(msg) => ("forbidden", msg.clone()),
            AppError::SerializationError(e) => ("serialization_error", sanitize_serde_error(e)),
            AppError::NotFound(msg) => ("not_found", msg.clone()),
            AppError::BadRequest(msg) => ("bad_request", msg.clone()),
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message,
            details: None, // Never expose internal details to clients
        };

        let mut response = (status, axum::Json(body)).into_response();
        if let AppError::RateLimitExceeded { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}

/// Sanitize serde error messages to avoid leaking internal type information.
fn sanitize_serde_error(e: &serde_json::Error) -> String {
    let msg = e.to_string();

    if msg.contains("missing field")
        && let Some(start) = msg.find('`')
        && let Some(end) = msg[start + 1..].find('`')
    {
        let field = &msg[start + 1..start + 1 + end];
        return format!("Missing required field: {field}");
    }

    if msg.contains("invalid type") {
        return "Invalid data type in request body".to_string();
    }

    if msg.contains("EOF while parsing") || msg.contains("expected") {
        return "Malformed JSON in request body".to_string();
    }

    "Invalid request format".to_string()
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_error_sets_retry_after() {
        let response = AppError::RateLimitExceeded {
            retry_after_secs: 42,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(RETRY_AFTER).unwrap(), "42");
    }

    #[test]
    fn test_csrf_errors_are_forbidden() {
        assert_eq!(AppError::CsrfMissing.status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::CsrfInvalid.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_config_error_is_server_error() {
        let response = AppError::ConfigError("SESSION_SECRET missing".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_sanitize_missing_field() {
        let err = serde_json::from_str::<serde_json::Map<String, serde_json::Value>>("{")
            .unwrap_err();
        assert_eq!(sanitize_serde_error(&err), "Malformed JSON in request body");
    }
}
