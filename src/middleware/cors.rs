//! Origin allow-list evaluation and CORS response headers.
//!
//! # Policy
//!
//! | Environment    | Origin allowed | Preflight | Other requests      |
//! |----------------|----------------|-----------|---------------------|
//! | production     | yes            | 200 + set | headers applied     |
//! | production     | no             | 403       | no CORS headers     |
//! | non-production | either         | 200 + set | headers applied     |
//!
//! Production fails closed; development and test fail open so local
//! frontends on arbitrary ports keep working. Outside production, any
//! `localhost`, `127.0.0.1` or `[::1]` origin is implicitly on the list, in
//! addition to `CORS_DEV_ORIGINS`.
//!
//! `tower_http::cors::CorsLayer` is not used here because it cannot express
//! the environment-dependent fail-open rule together with the
//! pipeline ordering required by the security middleware.

use std::collections::HashSet;
use std::sync::Arc;

use axum::body::Body;
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, VARY,
};
use axum::http::{HeaderMap, HeaderValue, Method, Response, StatusCode};
use axum::response::IntoResponse;

use crate::config::{Config, Environment};
use crate::error::AppError;

pub const ALLOWED_METHODS: &str = "GET, POST, PUT, PATCH, DELETE, OPTIONS";
pub const ALLOWED_HEADERS: &str =
    "Content-Type, Authorization, X-Requested-With, X-CSRF-Token, CSRF-Token, X-XSRF-Token";
pub const MAX_AGE_SECS: u32 = 86_400;

/// CORS allow-list evaluator.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    environment: Environment,
    allowed_origins: Arc<HashSet<String>>,
}

impl CorsPolicy {
    /// Build a policy. `dev_origins` only count outside production.
    pub fn new(environment: Environment, allowed: Vec<String>, dev_origins: Vec<String>) -> Self {
        let mut allowed_origins: HashSet<String> = allowed.into_iter().collect();
        if !environment.is_production() {
            allowed_origins.extend(dev_origins);
        }

        Self {
            environment,
            allowed_origins: Arc::new(allowed_origins),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.environment,
            config.cors_allowed_origins.clone(),
            config.cors_dev_origins.clone(),
        )
    }

    /// Whether `origin` is on the allow-list for this environment.
    pub fn is_origin_allowed(&self, origin: Option<&str>) -> bool {
        let Some(origin) = origin else {
            return false;
        };

        self.allowed_origins.contains(origin)
            || (!self.environment.is_production() && is_localhost_origin(origin))
    }

    /// Answer a preflight request, or `None` if `method` is not `OPTIONS`.
    pub fn handle_preflight(
        &self,
        origin: Option<&str>,
        method: &Method,
    ) -> Option<Response<Body>> {
        if method != Method::OPTIONS {
            return None;
        }

        if self.environment.is_production() && !self.is_origin_allowed(origin) {
            let rejected = origin.unwrap_or("<none>").to_string();
            return Some(AppError::CorsViolation(rejected).into_response());
        }

        let mut response = StatusCode::OK.into_response();
        self.write_headers(response.headers_mut(), origin);
        Some(response)
    }

    /// Add CORS headers to a non-preflight response when permitted.
    pub fn decorate(&self, headers: &mut HeaderMap, origin: Option<&str>) {
        if self.is_origin_allowed(origin) || !self.environment.is_production() {
            self.write_headers(headers, origin);
        }
    }

    fn write_headers(&self, headers: &mut HeaderMap, origin: Option<&str>) {
        if let Some(origin) = origin
            && let Ok(value) = HeaderValue::from_str(origin)
        {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
        }
        headers.insert(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        );
        headers.insert(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOWED_HEADERS),
        );
        headers.insert(
            ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
        headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from(MAX_AGE_SECS));
        headers.append(VARY, HeaderValue::from_static("Origin"));
    }
}

/// `http(s)://localhost`, `127.0.0.1` or `[::1]`, with any port.
fn is_localhost_origin(origin: &str) -> bool {
    let Some(rest) = origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"))
    else {
        return false;
    };

    let authority = rest.split('/').next().unwrap_or_default();
    let host = if let Some(v6) = authority.strip_prefix('[') {
        v6.split(']').next().unwrap_or_default()
    } else {
        authority.split(':').next().unwrap_or_default()
    };

    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn production() -> CorsPolicy {
        CorsPolicy::new(
            Environment::Production,
            vec!["https://app.example.com".to_string()],
            vec!["http://localhost:3000".to_string()],
        )
    }

    fn development() -> CorsPolicy {
        CorsPolicy::new(
            Environment::Development,
            vec!["https://app.example.com".to_string()],
            vec!["http://dev.example.test".to_string()],
        )
    }

    #[test]
    fn test_production_preflight_rejects_unknown_origin() {
        let response = production()
            .handle_preflight(Some("https://evil.example"), &Method::OPTIONS)
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[test]
    fn test_production_preflight_allows_listed_origin() {
        let response = production()
            .handle_preflight(Some("https://app.example.com"), &Method::OPTIONS)
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(
            headers.get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "https://app.example.com"
        );
        assert_eq!(headers.get(ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(), "true");
        assert!(
            headers
                .get(ACCESS_CONTROL_ALLOW_HEADERS)
                .unwrap()
                .to_str()
                .unwrap()
                .contains("X-CSRF-Token")
        );
        assert_eq!(headers.get(ACCESS_CONTROL_MAX_AGE).unwrap(), "86400");
    }

    #[test]
    fn test_development_preflight_fails_open() {
        let response = development()
            .handle_preflight(Some("https://evil.example"), &Method::OPTIONS)
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "https://evil.example"
        );
    }

    #[test]
    fn test_non_options_is_not_preflight() {
        assert!(
            production()
                .handle_preflight(Some("https://evil.example"), &Method::POST)
                .is_none()
        );
    }

    #[test]
    fn test_production_ignores_dev_origins() {
        let policy = production();
        assert!(!policy.is_origin_allowed(Some("http://localhost:3000")));
        assert!(!policy.is_origin_allowed(None));
    }

    #[test]
    fn test_development_allows_localhost_variants() {
        let policy = development();
        assert!(policy.is_origin_allowed(Some("http://localhost:5173")));
        assert!(policy.is_origin_allowed(Some("http://127.0.0.1:8080")));
        assert!(policy.is_origin_allowed(Some("http://[::1]:4000")));
        assert!(policy.is_origin_allowed(Some("http://dev.example.test")));
        assert!(!policy.is_origin_allowed(Some("http://localhost.evil.example")));
    }

    #[test]
    fn test_decorate_production_only_for_allowed() {
        let policy = production();

        let mut headers = HeaderMap::new();
        policy.decorate(&mut headers, Some("https://evil.example"));
        assert!(headers.is_empty());

        policy.decorate(&mut headers, Some("https://app.example.com"));
        assert_eq!(
            headers.get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "https://app.example.com"
        );
        assert_eq!(headers.get(VARY).unwrap(), "Origin");
    }

    #[test]
    fn test_decorate_development_always() {
        let mut headers = HeaderMap::new();
        development().decorate(&mut headers, None);

        assert!(headers.get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
        assert_eq!(
            headers.get(ACCESS_CONTROL_ALLOW_METHODS).unwrap(),
            ALLOWED_METHODS
        );
    }
}
