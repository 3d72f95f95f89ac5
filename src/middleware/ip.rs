//! Client identity resolution from proxy headers.
//!
//! The resolved value is the `ClientKey`: the unit of rate limiting and of
//! security-event attribution. It is derived once per request by the security
//! middleware and never persisted beyond the limiter's in-memory window.
//!
//! # Header Priority
//!
//! 1. `X-Forwarded-For` (first comma-separated entry, trimmed)
//! 2. `X-Real-IP`
//! 3. `X-Client-IP`
//! 4. the literal [`UNKNOWN_IP`]
//!
//! Empty values and values longer than [`MAX_CLIENT_KEY_LEN`] are treated as
//! absent and resolution falls through to the next header.
//!
//! # Security Warning: IP Spoofing Risk
//!
//! **These functions trust client-provided headers.** Deploy behind a reverse
//! proxy that overwrites (not appends to) these headers, and block direct
//! access to this service:
//!
//! ```nginx
//! proxy_set_header X-Real-IP $remote_addr;
//! proxy_set_header X-Forwarded-For $remote_addr;
//! ```
//!
//! Without that, a client can rotate spoofed addresses to dodge per-IP rate
//! limits or pin its traffic on someone else's key.
//!
//! All requests without identifiable headers share the `"unknown"` key and are
//! therefore rate-limited collectively.

use std::borrow::Cow;

use axum::http::{HeaderMap, Request};

/// Fallback value when no client IP can be determined.
pub const UNKNOWN_IP: &str = "unknown";

/// Longest header value accepted as a client key.
///
/// Covers a bracketed IPv6 address with zone id and port.
pub const MAX_CLIENT_KEY_LEN: usize = 64;

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";
const CLIENT_IP: &str = "x-client-ip";

/// Where the client address was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientIpSource {
    ForwardedFor,
    RealIp,
    ClientIp,
    Unknown,
}

/// Extract a usable value from a single header, borrowing from the map.
#[inline]
fn header_candidate<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let value = headers.get(name)?.to_str().ok()?;
    let candidate = if name == FORWARDED_FOR {
        value.split(',').next()?.trim()
    } else {
        value.trim()
    };

    (!candidate.is_empty() && candidate.len() <= MAX_CLIENT_KEY_LEN).then_some(candidate)
}

/// Resolve the client address and report which header supplied it.
///
/// Never fails. No allocation happens for the `"unknown"` fallback.
pub fn resolve_client_ip_with_source(headers: &HeaderMap) -> (Cow<'static, str>, ClientIpSource) {
    [
        (FORWARDED_FOR, ClientIpSource::ForwardedFor),
        (REAL_IP, ClientIpSource::RealIp),
        (CLIENT_IP, ClientIpSource::ClientIp),
    ]
    .into_iter()
    .find_map(|(name, source)| {
        header_candidate(headers, name).map(|ip| (Cow::Owned(ip.to_string()), source))
    })
    .unwrap_or((Cow::Borrowed(UNKNOWN_IP), ClientIpSource::Unknown))
}

/// Resolve the client address from a header set.
#[inline]
pub fn resolve_client_ip(headers: &HeaderMap) -> Cow<'static, str> {
    resolve_client_ip_with_source(headers).0
}

/// Resolve the client address of a request.
///
/// Use `.into_owned()` when the key must outlive the request, e.g. inside
/// the boxed future of a tower service.
#[inline]
pub fn extract_client_ip<B>(req: &Request<B>) -> Cow<'static, str> {
    resolve_client_ip(req.headers())
}
