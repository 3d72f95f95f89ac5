//! CSRF token issuance and verification (double-submit).
//!
//! # Token Format
//!
//! ```text
//! <b64url(16 random bytes)>.<issued_at unix secs>.<b64url(HMAC-SHA256(secret, "<random>.<issued_at>"))>
//! ```
//!
//! Verification is stateless: only the server-held secret is needed. Tokens
//! older than `max_age` (the absolute session lifetime) are rejected, as are
//! tokens stamped more than [`CLOCK_SKEW_SECS`] in the future.
//!
//! # Known Limitation
//!
//! Without `CSRF_SECRET` the key is generated per process, so tokens issued
//! before a restart no longer verify. Configure the secret in production.
//!
//! # Scope
//!
//! Only `POST`, `PUT`, `PATCH` and `DELETE` under `/api/` are checked.
//! Exempt prefixes cover endpoints that run before a session exists or that
//! are called by non-browser agents.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, Method, Request};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::TimeDelta;
use rand::RngCore;

use crate::clock::SharedClock;
use crate::config::{Config, Secret};
use crate::error::{AppError, AppResult};
use crate::signing::Signer;

/// Header names checked for the token, highest priority first.
pub const CSRF_HEADER_NAMES: [&str; 3] = ["x-csrf-token", "csrf-token", "x-xsrf-token"];

/// Cookie carrying the script-readable token.
pub const CSRF_COOKIE_NAME: &str = "csrf_token";

/// Tolerated future skew on `issued_at`.
pub const CLOCK_SKEW_SECS: i64 = 60;

const RANDOM_BYTES: usize = 16;

const PROTECTED_PREFIX: &str = "/api/";

/// Paths never subject to CSRF checks.
pub const DEFAULT_EXEMPT_PREFIXES: [&str; 6] = [
    "/api/auth/",
    "/api/health",
    "/health",
    "/api/metrics",
    "/metrics",
    "/api/security/csp-report",
];

/// Why a token failed. Server-side only; never sent to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrfFailure {
    Malformed,
    BadSignature,
    Expired,
    FromFuture,
}

impl CsrfFailure {
    pub fn as_str(self) -> &'static str {
        match self {
            CsrfFailure::Malformed => "malformed",
            CsrfFailure::BadSignature => "bad_signature",
            CsrfFailure::Expired => "expired",
            CsrfFailure::FromFuture => "issued_in_future",
        }
    }
}

/// Issues and verifies CSRF tokens. Cloning shares the key.
#[derive(Debug, Clone)]
pub struct CsrfGuard {
    signer: Arc<Signer>,
    clock: SharedClock,
    max_age: TimeDelta,
    exempt_prefixes: Arc<Vec<String>>,
}

impl CsrfGuard {
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` for an empty secret or a `max_age`
    /// too large to represent.
    pub fn new(secret: &Secret, max_age: Duration, clock: SharedClock) -> AppResult<Self> {
        let max_age = TimeDelta::from_std(max_age)
            .map_err(|e| AppError::ConfigError(format!("CSRF token max age out of range: {e}")))?;

        Ok(Self {
            signer: Arc::new(Signer::new(secret)?),
            clock,
            max_age,
            exempt_prefixes: Arc::new(
                DEFAULT_EXEMPT_PREFIXES
                    .iter()
                    .map(|s| (*s).to_string())
                    .collect(),
            ),
        })
    }

    /// # Errors
    ///
    /// See [`CsrfGuard::new`].
    pub fn from_config(config: &Config, clock: SharedClock) -> AppResult<Self> {
        Self::new(&config.csrf_secret, config.session_absolute_timeout, clock)
    }

    /// Mint a fresh token stamped with the current time.
    pub fn issue_token(&self) -> String {
        let mut random = [0u8; RANDOM_BYTES];
        rand::rng().fill_bytes(&mut random);

        let payload = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(random),
            self.clock.now().timestamp()
        );
        let tag = self.signer.sign_encoded(payload.as_bytes());
        format!("{payload}.{tag}")
    }

    /// Whether `token` was issued by this key and is still fresh.
    pub fn verify(&self, token: &str) -> bool {
        self.verify_detailed(token).is_ok()
    }

    /// Like [`CsrfGuard::verify`] but reports the failure reason.
    pub fn verify_detailed(&self, token: &str) -> Result<(), CsrfFailure> {
        let (payload, tag) = token.rsplit_once('.').ok_or(CsrfFailure::Malformed)?;
        let (random, issued_at) = payload.split_once('.').ok_or(CsrfFailure::Malformed)?;
        if random.is_empty() || tag.is_empty() {
            return Err(CsrfFailure::Malformed);
        }
        let issued_at: i64 = issued_at.parse().map_err(|_| CsrfFailure::Malformed)?;

        if !self.signer.verify_encoded(payload.as_bytes(), tag) {
            return Err(CsrfFailure::BadSignature);
        }

        let now = self.clock.now().timestamp();
        if issued_at > now + CLOCK_SKEW_SECS {
            return Err(CsrfFailure::FromFuture);
        }
        if now - issued_at > self.max_age.num_seconds() {
            return Err(CsrfFailure::Expired);
        }
        Ok(())
    }

    /// Whether a request with this method and path must carry a token.
    pub fn requires_check(&self, method: &Method, path: &str) -> bool {
        is_state_changing(method)
            && path.starts_with(PROTECTED_PREFIX)
            && !self
                .exempt_prefixes
                .iter()
                .any(|p| path.starts_with(p.as_str()))
    }

    /// Enforce CSRF on `req`.
    ///
    /// # Errors
    ///
    /// `AppError::CsrfMissing` when no token header is present,
    /// `AppError::CsrfInvalid` when the token does not verify. Neither
    /// carries the failure reason; use [`CsrfGuard::verify_detailed`] for logs.
    pub fn check<B>(&self, req: &Request<B>) -> AppResult<()> {
        if !self.requires_check(req.method(), req.uri().path()) {
            return Ok(());
        }

        let token = extract_token(req.headers()).ok_or(AppError::CsrfMissing)?;
        if self.verify(token) {
            Ok(())
        } else {
            Err(AppError::CsrfInvalid)
        }
    }
}

fn is_state_changing(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// First non-empty token header, in [`CSRF_HEADER_NAMES`] order.
pub fn extract_token(headers: &HeaderMap) -> Option<&str> {
    CSRF_HEADER_NAMES.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use axum::body::Body;

    fn guard() -> (CsrfGuard, ManualClock) {
        let clock = ManualClock::default();
        let guard = CsrfGuard::new(
            &Secret::new("test-csrf-secret"),
            Duration::from_secs(7 * 24 * 60 * 60),
            Arc::new(clock.clone()),
        )
        .unwrap();
        (guard, clock)
    }

    fn post(path: &str, header: Option<(&str, &str)>) -> Request<Body> {
        let mut builder = Request::builder().method(Method::POST).uri(path);
        if let Some((name, value)) = header {
            builder = builder.header(name, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn mutate_one_char(token: &str) -> String {
        let mut chars: Vec<char> = token.chars().collect();
        chars[0] = if chars[0] == 'A' { 'B' } else { 'A' };
        chars.into_iter().collect()
    }

    #[test]
    fn test_issued_token_verifies() {
        let (guard, _) = guard();
        let token = guard.issue_token();

        assert_eq!(token.split('.').count(), 3);
        assert!(guard.verify(&token));
    }

    #[test]
    fn test_tokens_are_unique() {
        let (guard, _) = guard();
        assert_ne!(guard.issue_token(), guard.issue_token());
    }

    #[test]
    fn test_mutated_token_rejected() {
        let (guard, _) = guard();
        let token = guard.issue_token();

        assert_eq!(
            guard.verify_detailed(&mutate_one_char(&token)),
            Err(CsrfFailure::BadSignature)
        );
    }

    #[test]
    fn test_token_from_other_key_rejected() {
        let (guard, clock) = guard();
        let other = CsrfGuard::new(
            &Secret::new("another-secret"),
            Duration::from_secs(3600),
            Arc::new(clock),
        )
        .unwrap();

        assert!(!guard.verify(&other.issue_token()));
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        let (guard, _) = guard();
        for token in ["", ".", "..", "abc", "a.b", "a.notanumber.c", "a.1.", ".1.c"] {
            assert_eq!(
                guard.verify_detailed(token),
                Err(CsrfFailure::Malformed),
                "{token:?}"
            );
        }
    }

    #[test]
    fn test_expired_token_rejected() {
        let (guard, clock) = guard();
        let token = guard.issue_token();

        clock.advance(chrono::Duration::days(7));
        assert!(guard.verify(&token));

        clock.advance(chrono::Duration::seconds(1));
        assert_eq!(guard.verify_detailed(&token), Err(CsrfFailure::Expired));
    }

    #[test]
    fn test_future_token_rejected() {
        let (guard, clock) = guard();
        let token = guard.issue_token();

        clock.advance(chrono::Duration::minutes(-5));
        assert_eq!(guard.verify_detailed(&token), Err(CsrfFailure::FromFuture));
    }

    #[test]
    fn test_missing_token_on_api_post() {
        let (guard, _) = guard();
        let err = guard.check(&post("/api/prompts", None)).unwrap_err();
        assert!(matches!(err, AppError::CsrfMissing));
    }

    #[test]
    fn test_valid_token_on_api_post() {
        let (guard, _) = guard();
        let token = guard.issue_token();
        assert!(guard.check(&post("/api/prompts", Some(("x-csrf-token", &token)))).is_ok());
    }

    #[test]
    fn test_invalid_token_on_api_post() {
        let (guard, _) = guard();
        let err = guard
            .check(&post("/api/prompts", Some(("x-csrf-token", "forged.1.tag"))))
            .unwrap_err();
        assert!(matches!(err, AppError::CsrfInvalid));
    }

    #[test]
    fn test_alternate_header_names() {
        let (guard, _) = guard();
        let token = guard.issue_token();

        for name in ["csrf-token", "x-xsrf-token"] {
            assert!(guard.check(&post("/api/prompts", Some((name, &token)))).is_ok());
        }
    }

    #[test]
    fn test_header_priority() {
        let (guard, _) = guard();
        let token = guard.issue_token();
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/prompts")
            .header("x-csrf-token", "bogus")
            .header("csrf-token", &token)
            .body(Body::empty())
            .unwrap();

        assert!(matches!(guard.check(&req), Err(AppError::CsrfInvalid)));
    }

    #[test]
    fn test_safe_methods_and_exempt_paths_skip() {
        let (guard, _) = guard();

        assert!(!guard.requires_check(&Method::GET, "/api/prompts"));
        assert!(!guard.requires_check(&Method::OPTIONS, "/api/prompts"));
        assert!(!guard.requires_check(&Method::POST, "/api/auth/login"));
        assert!(!guard.requires_check(&Method::POST, "/api/security/csp-report"));
        assert!(!guard.requires_check(&Method::POST, "/api/health"));
        assert!(!guard.requires_check(&Method::POST, "/prompts/new"));
        assert!(guard.requires_check(&Method::DELETE, "/api/prompts/1"));
        assert!(guard.requires_check(&Method::PATCH, "/api/admin/users"));
    }
}
