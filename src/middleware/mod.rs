//! HTTP security middleware.
//!
//! Each concern is a plain component usable on its own; [`SecurityLayer`]
//! composes them into one tower layer:
//!
//! - **ip**: client key from proxy headers
//! - **rate_limit**: fixed-window limiter over an injectable store
//! - **cors**: origin allow-list, fail-closed in production only
//! - **csrf**: HMAC-signed double-submit tokens
//! - **csp**: per-request nonce and policy string
//! - **headers**: static hardening headers
//! - **events**: security event sink (tracing + metrics)
//! - **security**: the orchestrating layer
//!
//! # Security Considerations
//!
//! - Client keys come from proxy headers; see [`ip`] for deployment notes
//! - Token and tag comparisons are constant time
//! - Rejection bodies never say why a token failed

pub mod cors;
pub mod csp;
pub mod csrf;
pub mod events;
pub mod headers;
pub mod ip;
pub mod rate_limit;
pub mod security;

pub use cors::CorsPolicy;
pub use csp::{CspNonce, CspPolicyBuilder};
pub use csrf::CsrfGuard;
pub use events::{RequestContext, SecurityEventKind};
pub use headers::SecurityHeaderWriter;
pub use ip::{UNKNOWN_IP, extract_client_ip, resolve_client_ip};
pub use rate_limit::{
    InMemoryRateLimitStore, RateDecision, RateLimitError, RateLimitPolicy, RateLimitStore,
    RateLimiter,
};
pub use security::{RouteGate, SecurityLayer, SecurityService};
