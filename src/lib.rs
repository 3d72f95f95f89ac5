//! # Edge Guard
//!
//! Request-security and session-lifecycle middleware for Axum services:
//!
//! - **Rate limiting**: fixed-window, per client key, strict route ceiling
//! - **CORS**: allow-list, fail-closed in production, fail-open elsewhere
//! - **CSRF**: stateless HMAC double-submit tokens
//! - **CSP**: per-request nonce, strict or permissive policy
//! - **Hardening headers**: frame, sniffing, referrer, permissions, HSTS
//! - **Sessions**: signed cookie tokens with idle/absolute timeouts,
//!   rotation and a legacy-format fallback
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Request ID → Trace → SecurityLayer                         │
//! │    (CORS → rate limit → CSRF → gate → CSP/headers)          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (health, auth, admin, csp-report)                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  SessionManager ── UserDirectory                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use edge_guard::{AppState, Config, InMemoryUserDirectory, build_router};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(config.clone(), Arc::new(InMemoryUserDirectory::new()))?;
//!     let app = build_router(state);
//!
//!     let listener = tokio::net::TcpListener::bind(config.server_addr()).await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Wrapping Your Own Routes
//!
//! ```rust,ignore
//! let app = Router::new()
//!     .route("/api/prompts", post(create_prompt))
//!     .layer(edge_guard::routes::security_layer(&state))
//!     .with_state(state);
//! ```

pub mod clock;
pub mod config;
pub mod directory;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod session;
pub mod signing;
pub mod state;
pub mod utils;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{Config, Environment, Secret};
pub use directory::{InMemoryUserDirectory, User, UserDirectory, UserRole};
pub use error::{AppError, AppResult};
pub use routes::build_router;
pub use session::{SessionManager, SessionState};
pub use state::AppState;
