//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← sets/propagates x-request-id
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP span per request
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Body size limit │
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Security layer  │ ← CORS · 429 · CSRF 403 · login redirect · CSP + headers
//! └────────┬─────────┘
//!          ▼
//!      Handler
//! ```
//!
//! # Route Groups
//!
//! - `/health`, `/api/health` - liveness
//! - `/api/auth/*` - CSRF token, login, logout, session status, rotation
//! - `/api/security/csp-report` - CSP violation reports
//! - `/admin` - administrator dashboard (protected prefix)

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderName;
use axum::routing::{get, post};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers;
use crate::middleware::SecurityLayer;
use crate::state::AppState;

/// Header carrying the request id.
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Maximum accepted request body.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Build the application router with all routes and middleware configured.
pub fn build_router(state: AppState) -> Router {
    let config = &state.config;
    info!(
        environment = %config.environment,
        csp_enabled = config.csp_enabled,
        rate_limit_max = config.rate_limit_max,
        rate_limit_strict_max = config.rate_limit_strict_max,
        legacy_sessions = config.legacy_sessions_enabled,
        "Security middleware configured"
    );

    let security = security_layer(&state);

    Router::new()
        // Health
        .route("/health", get(handlers::health_check))
        .route("/api/health", get(handlers::health_check))
        // Authentication
        .route("/api/auth/csrf", get(handlers::auth::issue_csrf))
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/auth/logout", post(handlers::auth::logout))
        .route("/api/auth/session", get(handlers::auth::session_status))
        .route("/api/auth/rotate", post(handlers::auth::rotate))
        // Reports
        .route("/api/security/csp-report", post(handlers::csp_report))
        // Protected
        .route("/admin", get(handlers::admin::dashboard))
        .fallback(handlers::not_found)
        .layer(security)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(REQUEST_ID_HEADER))
        .layer(SetRequestIdLayer::new(REQUEST_ID_HEADER, MakeRequestUuid))
        .with_state(state)
}

/// The security layer for `state`, for wrapping routes outside
/// [`build_router`].
pub fn security_layer(state: &AppState) -> SecurityLayer {
    state.security_layer()
}
