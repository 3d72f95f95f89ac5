pub mod admin;
pub mod auth;
mod csp_report;
mod health;

pub use csp_report::csp_report;
pub use health::health_check;

use crate::error::AppError;

/// Fallback for unmatched routes. Runs inside the security layer, so
/// unknown paths are still rate limited and CSRF checked.
pub async fn not_found() -> AppError {
    AppError::NotFound("Route not found".to_string())
}
