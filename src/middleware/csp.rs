//! Per-request Content-Security-Policy.
//!
//! Two shapes exist and both are relied on:
//!
//! - **enabled** (default): strict allow-list, every script and style
//!   directive scoped to the request's [`CspNonce`].
//! - **disabled**: permissive `default-src *` with `'unsafe-inline'` and
//!   `'unsafe-eval'`, for local development only.

use std::fmt;

use axum::http::header::CONTENT_SECURITY_POLICY;
use axum::http::{HeaderMap, HeaderValue};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;

use crate::config::Config;

const NONCE_BYTES: usize = 16;

const SCRIPT_CDNS: [&str; 2] = ["https://cdn.jsdelivr.net", "https://unpkg.com"];
const STYLE_CDNS: [&str; 2] = ["https://fonts.googleapis.com", "https://cdn.jsdelivr.net"];
const FONT_HOSTS: [&str; 1] = ["https://fonts.gstatic.com"];

/// Single-use CSP nonce, base64 of 16 OS-random bytes.
///
/// The security middleware stores one in request extensions so handlers
/// can stamp it on inline `<script>`/`<style>` tags.
#[derive(Clone, PartialEq, Eq)]
pub struct CspNonce(String);

impl CspNonce {
    pub fn generate() -> Self {
        let mut bytes = [0u8; NONCE_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        Self(STANDARD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CspNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for CspNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CspNonce({})", self.0)
    }
}

/// Builds the `Content-Security-Policy` value for one response.
#[derive(Debug, Clone)]
pub struct CspPolicyBuilder {
    enabled: bool,
    report_uri: String,
}

impl CspPolicyBuilder {
    pub fn new(enabled: bool, report_uri: impl Into<String>) -> Self {
        Self {
            enabled,
            report_uri: report_uri.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.csp_enabled, config.csp_report_uri.clone())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Policy string for `nonce` using the configured mode.
    pub fn build(&self, nonce: &CspNonce) -> String {
        Self::build_with(nonce, self.enabled, &self.report_uri)
    }

    /// Policy string for an explicit mode.
    pub fn build_with(nonce: &CspNonce, enabled: bool, report_uri: &str) -> String {
        if !enabled {
            return permissive_policy();
        }

        let nonce_src = format!("'nonce-{nonce}'");
        let mut directives = vec![
            "default-src 'self'".to_string(),
            format!("script-src 'self' {nonce_src} {}", SCRIPT_CDNS.join(" ")),
            format!("style-src 'self' {nonce_src} {}", STYLE_CDNS.join(" ")),
            format!("font-src 'self' {} data:", FONT_HOSTS.join(" ")),
            "img-src 'self' data: https: blob:".to_string(),
            "connect-src 'self'".to_string(),
            "object-src 'none'".to_string(),
            "frame-src 'none'".to_string(),
            "base-uri 'self'".to_string(),
            "form-action 'self'".to_string(),
            "frame-ancestors 'none'".to_string(),
            "upgrade-insecure-requests".to_string(),
        ];
        if !report_uri.is_empty() {
            directives.push(format!("report-uri {report_uri}"));
        }
        directives.join("; ")
    }

    /// Set the header on `headers`, replacing any value set downstream.
    pub fn apply(&self, headers: &mut HeaderMap, nonce: &CspNonce) {
        match HeaderValue::from_str(&self.build(nonce)) {
            Ok(value) => {
                headers.insert(CONTENT_SECURITY_POLICY, value);
            }
            // Only reachable with a report URI containing control characters.
            Err(e) => tracing::error!(error = %e, "Unrepresentable CSP header"),
        }
    }
}

fn permissive_policy() -> String {
    [
        "default-src * 'unsafe-inline' 'unsafe-eval' data: blob:",
        "script-src * 'unsafe-inline' 'unsafe-eval' data: blob:",
        "style-src * 'unsafe-inline' data: blob:",
        "img-src * data: blob:",
        "font-src * data:",
        "connect-src *",
    ]
    .join("; ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_is_fresh_and_long_enough() {
        let a = CspNonce::generate();
        let b = CspNonce::generate();

        assert_ne!(a, b);
        assert_eq!(STANDARD.decode(a.as_str()).unwrap().len(), NONCE_BYTES);
    }

    #[test]
    fn test_enabled_policy_shape() {
        let nonce = CspNonce::generate();
        let policy = CspPolicyBuilder::new(true, "/api/security/csp-report").build(&nonce);
        let nonce_src = format!("'nonce-{nonce}'");

        assert!(policy.starts_with("default-src 'self'"));
        assert!(policy.contains(&format!("script-src 'self' {nonce_src}")));
        assert!(policy.contains(&format!("style-src 'self' {nonce_src}")));
        assert!(policy.contains("object-src 'none'"));
        assert!(policy.contains("frame-src 'none'"));
        assert!(policy.contains("frame-ancestors 'none'"));
        assert!(policy.contains("upgrade-insecure-requests"));
        assert!(policy.ends_with("report-uri /api/security/csp-report"));
        assert!(!policy.contains("unsafe-inline"));
        assert_eq!(policy.matches(&nonce_src).count(), 2);
    }

    #[test]
    fn test_disabled_policy_shape() {
        let policy = CspPolicyBuilder::new(false, "/r").build(&CspNonce::generate());

        assert!(policy.contains("default-src *"));
        assert!(policy.contains("'unsafe-inline'"));
        assert!(policy.contains("'unsafe-eval'"));
        assert!(!policy.contains("nonce-"));
        assert!(!policy.contains("report-uri"));
    }

    #[test]
    fn test_empty_report_uri_omits_directive() {
        let policy = CspPolicyBuilder::build_with(&CspNonce::generate(), true, "");
        assert!(!policy.contains("report-uri"));
    }

    #[test]
    fn test_apply_overwrites_existing_header() {
        let builder = CspPolicyBuilder::new(true, "/r");
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_SECURITY_POLICY, HeaderValue::from_static("default-src *"));

        builder.apply(&mut headers, &CspNonce::generate());

        let value = headers.get(CONTENT_SECURITY_POLICY).unwrap().to_str().unwrap();
        assert!(value.starts_with("default-src 'self'"));
    }
}
