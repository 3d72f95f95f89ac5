//! Fuzz testing for untrusted request input.
//!
//! Everything here parses attacker-controlled bytes: CSRF tokens from
//! headers, session tokens from cookies, and client addresses from proxy
//! headers. None of it may panic, whatever the input.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! # Install cargo-fuzz (requires nightly)
//! cargo +nightly install cargo-fuzz
//!
//! # Run the token fuzz target
//! cargo +nightly fuzz run fuzz_tokens
//!
//! # Run with a time limit (e.g., 60 seconds)
//! cargo +nightly fuzz run fuzz_tokens -- -max_total_time=60
//! ```
//!
//! # What This Tests
//!
//! - `CsrfGuard::verify_detailed`: token structure, timestamp and tag checks
//! - `CurrentTokenCodec::verify` / `LegacyTokenCodec::verify`: session tokens
//! - `CookieJar::from_headers`: `Cookie` header parsing
//! - `resolve_client_ip`: proxy header resolution

#![no_main]

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue};
use chrono::Utc;
use edge_guard::config::Secret;
use edge_guard::middleware::csrf::CsrfGuard;
use edge_guard::middleware::ip::resolve_client_ip;
use edge_guard::session::{CookieJar, CurrentTokenCodec, LegacyTokenCodec};
use edge_guard::signing::Signer;
use edge_guard::SystemClock;
use libfuzzer_sys::fuzz_target;

struct Targets {
    csrf: CsrfGuard,
    current: CurrentTokenCodec,
    legacy: LegacyTokenCodec,
}

fn targets() -> Option<&'static Targets> {
    static TARGETS: OnceLock<Option<Targets>> = OnceLock::new();
    TARGETS
        .get_or_init(|| {
            let secret = Secret::new("fuzzing-secret-fuzzing-secret-fuzzing");
            Some(Targets {
                csrf: CsrfGuard::new(&secret, Duration::from_secs(3600), Arc::new(SystemClock))
                    .ok()?,
                current: CurrentTokenCodec::new(&secret),
                legacy: LegacyTokenCodec::new(Signer::new(&secret).ok()?),
            })
        })
        .as_ref()
}

fuzz_target!(|data: &[u8]| {
    let Some(targets) = targets() else {
        return;
    };

    if let Ok(s) = std::str::from_utf8(data) {
        let now = Utc::now();
        let _ = targets.csrf.verify_detailed(s);
        let _ = targets.current.verify(s, now);
        let _ = targets.legacy.verify(s, now);
    }

    // Header values accept arbitrary visible bytes, not just UTF-8
    if let Ok(value) = HeaderValue::from_bytes(data) {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", value.clone());
        headers.insert("cookie", value);
        let _ = resolve_client_ip(&headers);
        let jar = CookieJar::from_headers(&headers);
        let _ = jar.get("session");
    }
});
