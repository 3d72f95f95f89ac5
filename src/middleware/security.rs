//! Request security pipeline.
//!
//! # Order
//!
//! ```text
//! resolve client ─▶ log start ─▶ CORS preflight ──────────────────────────────▶ return
//!                                     │ (not OPTIONS)
//!                                     ▼
//!                               rate limit ── deny ──▶ 429 ─┐
//!                                     ▼                     │
//!                                   CSRF ──── fail ──▶ 403 ─┤
//!                                     ▼                     │
//!                            protected-path gate ─ no cookie ─▶ 307 login ─┤
//!                                     ▼                     │
//!                                  handler                  │
//!                                     ▼                     ▼
//!               CSP ─▶ static headers ─▶ rate-limit headers ─▶ CORS ─▶ log response
//! ```
//!
//! The gate runs before the handler so a protected handler never executes
//! for a cookie-less request. It only checks that a `session` cookie is
//! present; handlers under protected prefixes verify the session fully.
//!
//! Every response except a preflight answer is decorated, including
//! rejections, so browsers can read 429/403 bodies cross-origin.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::http::header::ORIGIN;
use axum::http::{Request, Response};
use axum::response::{IntoResponse, Redirect};
use tower::{Layer, Service};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::AppError;
use crate::metrics;
use crate::session::SessionManager;

use super::cors::CorsPolicy;
use super::csp::{CspNonce, CspPolicyBuilder};
use super::csrf::{CsrfFailure, CsrfGuard, extract_token};
use super::events::{RequestContext, SecurityEventKind};
use super::headers::SecurityHeaderWriter;
use super::rate_limit::{RateDecision, RateLimiter};

/// Redirects cookie-less requests under protected prefixes to the login page.
#[derive(Debug, Clone)]
pub struct RouteGate {
    protected_prefixes: Vec<String>,
    login_path: String,
}

impl RouteGate {
    pub fn new(protected_prefixes: Vec<String>, login_path: impl Into<String>) -> Self {
        Self {
            protected_prefixes,
            login_path: login_path.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.protected_path_prefixes.clone(),
            config.login_path.clone(),
        )
    }

    pub fn is_protected(&self, path: &str) -> bool {
        self.protected_prefixes
            .iter()
            .any(|p| path == p || path.starts_with(&format!("{}/", p.trim_end_matches('/'))))
    }

    /// `<login>?redirect=<path>`
    pub fn login_location(&self, path: &str) -> String {
        format!("{}?redirect={}", self.login_path, encode_query_value(path))
    }
}

/// Percent-encode everything outside RFC 3986 unreserved characters and `/`.
fn encode_query_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~' | b'/') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

#[derive(Debug)]
struct Pipeline {
    rate_limiter: RateLimiter,
    cors: CorsPolicy,
    csrf: CsrfGuard,
    csp: CspPolicyBuilder,
    headers: SecurityHeaderWriter,
    gate: RouteGate,
}

/// Tower layer running the full security pipeline around a service.
#[derive(Debug, Clone)]
pub struct SecurityLayer {
    pipeline: Arc<Pipeline>,
}

impl SecurityLayer {
    pub fn new(
        rate_limiter: RateLimiter,
        cors: CorsPolicy,
        csrf: CsrfGuard,
        csp: CspPolicyBuilder,
        headers: SecurityHeaderWriter,
        gate: RouteGate,
    ) -> Self {
        Self {
            pipeline: Arc::new(Pipeline {
                rate_limiter,
                cors,
                csrf,
                csp,
                headers,
                gate,
            }),
        }
    }
}

impl<S> Layer<S> for SecurityLayer {
    type Service = SecurityService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SecurityService {
            inner,
            pipeline: self.pipeline.clone(),
        }
    }
}

/// Service produced by [`SecurityLayer`].
#[derive(Debug, Clone)]
pub struct SecurityService<S> {
    inner: S,
    pipeline: Arc<Pipeline>,
}

impl<S> Service<Request<Body>> for SecurityService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let pipeline = self.pipeline.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let started = Instant::now();
            let ctx = RequestContext::from_request(&req);
            debug!(
                method = %ctx.method,
                url = %ctx.url,
                client_ip = %ctx.client_ip,
                "Request started"
            );

            let origin = req
                .headers()
                .get(ORIGIN)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);

            if let Some(response) = pipeline.cors.handle_preflight(origin.as_deref(), &ctx.method)
            {
                if !response.status().is_success() {
                    ctx.emit_with_detail(
                        SecurityEventKind::CorsRejected,
                        origin.as_deref().unwrap_or("<none>"),
                    );
                }
                finish(&ctx, &response, started);
                return Ok(response);
            }

            let path = req.uri().path().to_owned();
            let strict = pipeline.rate_limiter.is_strict_path(&path);
            let decision = pipeline
                .rate_limiter
                .check_and_consume(&ctx.client_ip, strict);
            let nonce = CspNonce::generate();

            let mut response = match pipeline.screen(&req, &ctx, &path, &decision) {
                Some(rejection) => rejection,
                None => {
                    req.extensions_mut().insert(nonce.clone());
                    req.extensions_mut().insert(ctx.clone());
                    inner.call(req).await?
                }
            };

            let headers = response.headers_mut();
            pipeline.csp.apply(headers, &nonce);
            pipeline.headers.apply(headers);
            decision.apply_headers(headers);
            pipeline.cors.decorate(headers, origin.as_deref());

            finish(&ctx, &response, started);
            Ok(response)
        })
    }
}

impl Pipeline {
    /// The short-circuit response for a request that may not reach the
    /// handler, or `None` to let it through.
    fn screen(
        &self,
        req: &Request<Body>,
        ctx: &RequestContext,
        path: &str,
        decision: &RateDecision,
    ) -> Option<Response<Body>> {
        if !decision.allowed {
            ctx.emit(SecurityEventKind::RateLimited);
            let retry_after_secs = self.rate_limiter.retry_after_secs(decision);
            return Some(AppError::RateLimitExceeded { retry_after_secs }.into_response());
        }

        if let Err(err) = self.csrf.check(req) {
            match err {
                AppError::CsrfMissing => ctx.emit(SecurityEventKind::CsrfMissing),
                _ => {
                    let reason = extract_token(req.headers())
                        .and_then(|token| self.csrf.verify_detailed(token).err())
                        .map_or("invalid", CsrfFailure::as_str);
                    ctx.emit_with_detail(SecurityEventKind::CsrfInvalid, reason);
                }
            }
            return Some(err.into_response());
        }

        if self.gate.is_protected(path) && !SessionManager::has_session_cookie(req.headers()) {
            ctx.emit(SecurityEventKind::AdminRedirect);
            return Some(Redirect::temporary(&self.gate.login_location(path)).into_response());
        }

        None
    }
}

fn finish(ctx: &RequestContext, response: &Response<Body>, started: Instant) {
    let elapsed = started.elapsed();
    let status = response.status();
    info!(
        method = %ctx.method,
        url = %ctx.url,
        client_ip = %ctx.client_ip,
        status = status.as_u16(),
        duration_ms = elapsed.as_millis() as u64,
        "Request completed"
    );
    metrics::record_request(ctx.method.as_str(), status.as_u16(), elapsed.as_secs_f64());
}
