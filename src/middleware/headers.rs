//! Static hardening headers.

use axum::http::header::{
    REFERRER_POLICY, SERVER, STRICT_TRANSPORT_SECURITY, X_CONTENT_TYPE_OPTIONS,
    X_DNS_PREFETCH_CONTROL, X_FRAME_OPTIONS, X_XSS_PROTECTION,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::config::Environment;

pub const PERMISSIONS_POLICY: &str = "camera=(), microphone=(), geolocation=(), payment=(), \
     usb=(), magnetometer=(), gyroscope=(), accelerometer=(), interest-cohort=()";

pub const HSTS: &str = "max-age=31536000; includeSubDomains; preload";

const CROSS_ORIGIN_EMBEDDER_POLICY: HeaderName =
    HeaderName::from_static("cross-origin-embedder-policy");
const CROSS_ORIGIN_OPENER_POLICY: HeaderName =
    HeaderName::from_static("cross-origin-opener-policy");
const CROSS_ORIGIN_RESOURCE_POLICY: HeaderName =
    HeaderName::from_static("cross-origin-resource-policy");
const PERMISSIONS_POLICY_HEADER: HeaderName = HeaderName::from_static("permissions-policy");
const X_POWERED_BY: HeaderName = HeaderName::from_static("x-powered-by");

/// Writes the fixed security header set. HSTS only in production.
#[derive(Debug, Clone, Copy)]
pub struct SecurityHeaderWriter {
    environment: Environment,
}

impl SecurityHeaderWriter {
    pub fn new(environment: Environment) -> Self {
        Self { environment }
    }

    pub fn apply(&self, headers: &mut HeaderMap) {
        let fixed: [(HeaderName, &'static str); 9] = [
            (X_FRAME_OPTIONS, "DENY"),
            (X_CONTENT_TYPE_OPTIONS, "nosniff"),
            (X_XSS_PROTECTION, "1; mode=block"),
            (CROSS_ORIGIN_EMBEDDER_POLICY, "require-corp"),
            (CROSS_ORIGIN_OPENER_POLICY, "same-origin"),
            (CROSS_ORIGIN_RESOURCE_POLICY, "same-origin"),
            (X_DNS_PREFETCH_CONTROL, "off"),
            (REFERRER_POLICY, "strict-origin-when-cross-origin"),
            (PERMISSIONS_POLICY_HEADER, PERMISSIONS_POLICY),
        ];
        for (name, value) in fixed {
            headers.insert(name, HeaderValue::from_static(value));
        }

        if self.environment.is_production() {
            headers.insert(STRICT_TRANSPORT_SECURITY, HeaderValue::from_static(HSTS));
        }

        headers.remove(SERVER);
        headers.remove(X_POWERED_BY);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_headers_set() {
        let mut headers = HeaderMap::new();
        SecurityHeaderWriter::new(Environment::Development).apply(&mut headers);

        assert_eq!(headers.get(X_FRAME_OPTIONS).unwrap(), "DENY");
        assert_eq!(headers.get(X_CONTENT_TYPE_OPTIONS).unwrap(), "nosniff");
        assert_eq!(headers.get(X_XSS_PROTECTION).unwrap(), "1; mode=block");
        assert_eq!(headers.get("cross-origin-embedder-policy").unwrap(), "require-corp");
        assert_eq!(headers.get("cross-origin-opener-policy").unwrap(), "same-origin");
        assert_eq!(headers.get("cross-origin-resource-policy").unwrap(), "same-origin");
        assert_eq!(headers.get(X_DNS_PREFETCH_CONTROL).unwrap(), "off");
        assert_eq!(
            headers.get(REFERRER_POLICY).unwrap(),
            "strict-origin-when-cross-origin"
        );
        assert!(
            headers
                .get("permissions-policy")
                .unwrap()
                .to_str()
                .unwrap()
                .contains("camera=()")
        );
        assert!(headers.get(STRICT_TRANSPORT_SECURITY).is_none());
    }

    #[test]
    fn test_hsts_only_in_production() {
        let mut headers = HeaderMap::new();
        SecurityHeaderWriter::new(Environment::Production).apply(&mut headers);
        assert_eq!(headers.get(STRICT_TRANSPORT_SECURITY).unwrap(), HSTS);

        let mut headers = HeaderMap::new();
        SecurityHeaderWriter::new(Environment::Test).apply(&mut headers);
        assert!(headers.get(STRICT_TRANSPORT_SECURITY).is_none());
    }

    #[test]
    fn test_technology_disclosure_removed() {
        let mut headers = HeaderMap::new();
        headers.insert(SERVER, HeaderValue::from_static("hyper"));
        headers.insert("x-powered-by", HeaderValue::from_static("axum"));

        SecurityHeaderWriter::new(Environment::Development).apply(&mut headers);

        assert!(headers.get(SERVER).is_none());
        assert!(headers.get("x-powered-by").is_none());
    }
}
