//! Liveness endpoint.
//!
//! Served at both `/health` and `/api/health`. Both paths are exempt from
//! CSRF and never touch the session layer.

use axum::Json;
use axum::extract::State;
use tracing::instrument;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint.
///
/// Always returns 200 OK.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "healthy",
///   "environment": "production",
///   "version": "0.1.0",
///   "uptime_secs": 3600,
///   "rate_limit_windows": 42,
///   "timestamp": "2024-01-15T10:30:00Z"
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        environment: state.config.environment.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        rate_limit_windows: state.rate_limiter.active_windows(),
        timestamp: state.clock.now(),
    })
}
