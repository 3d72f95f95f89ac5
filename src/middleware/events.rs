//! Security event sink.
//!
//! Each event becomes one structured `tracing` record under the `security`
//! target plus one increment of `edge_guard_security_events_total`. Both are
//! fire-and-forget and cannot fail the request that raised them.

use axum::http::{Method, Request};
use tracing::warn;

use crate::metrics;

use super::ip::extract_client_ip;

/// Kinds of security-relevant outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityEventKind {
    RateLimited,
    CsrfMissing,
    CsrfInvalid,
    CorsRejected,
    SessionInvalid,
    AdminRedirect,
    CspViolation,
}

impl SecurityEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SecurityEventKind::RateLimited => "rate_limited",
            SecurityEventKind::CsrfMissing => "csrf_missing",
            SecurityEventKind::CsrfInvalid => "csrf_invalid",
            SecurityEventKind::CorsRejected => "cors_rejected",
            SecurityEventKind::SessionInvalid => "session_invalid",
            SecurityEventKind::AdminRedirect => "admin_redirect",
            SecurityEventKind::CspViolation => "csp_violation",
        }
    }
}

/// Per-request attribution captured once by the security middleware.
///
/// Inserted into request extensions so handlers can attribute their own
/// events to the same client key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub method: Method,
    /// Path and query, as received.
    pub url: String,
    pub client_ip: String,
}

impl RequestContext {
    pub fn from_request<B>(req: &Request<B>) -> Self {
        Self {
            method: req.method().clone(),
            url: req
                .uri()
                .path_and_query()
                .map_or_else(|| req.uri().path().to_string(), |pq| pq.as_str().to_string()),
            client_ip: extract_client_ip(req).into_owned(),
        }
    }

    /// Record `kind` attributed to this request.
    pub fn emit(&self, kind: SecurityEventKind) {
        warn!(
            target: "security",
            event = kind.as_str(),
            method = %self.method,
            url = %self.url,
            client_ip = %self.client_ip,
            "Security event"
        );
        metrics::record_security_event(kind.as_str());
    }

    /// Record `kind` with an extra server-side-only detail.
    pub fn emit_with_detail(&self, kind: SecurityEventKind, detail: &str) {
        warn!(
            target: "security",
            event = kind.as_str(),
            method = %self.method,
            url = %self.url,
            client_ip = %self.client_ip,
            detail,
            "Security event"
        );
        metrics::record_security_event(kind.as_str());
    }
}

/// Record an event that has no request attached (e.g. session cleanup).
pub fn emit_unattributed(kind: SecurityEventKind, detail: &str) {
    warn!(target: "security", event = kind.as_str(), detail, "Security event");
    metrics::record_security_event(kind.as_str());
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_context_from_request() {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/prompts?draft=1")
            .header("x-forwarded-for", "1.2.3.4")
            .body(Body::empty())
            .unwrap();

        let ctx = RequestContext::from_request(&req);

        assert_eq!(ctx.method, Method::POST);
        assert_eq!(ctx.url, "/api/prompts?draft=1");
        assert_eq!(ctx.client_ip, "1.2.3.4");
    }

    #[test]
    fn test_emit_does_not_panic_without_subscriber() {
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let ctx = RequestContext::from_request(&req);

        ctx.emit(SecurityEventKind::CsrfMissing);
        ctx.emit_with_detail(SecurityEventKind::CsrfInvalid, "signature mismatch");
        emit_unattributed(SecurityEventKind::SessionInvalid, "expired");
    }

    #[test]
    fn test_event_names_are_stable() {
        assert_eq!(SecurityEventKind::RateLimited.as_str(), "rate_limited");
        assert_eq!(SecurityEventKind::AdminRedirect.as_str(), "admin_redirect");
    }
}
