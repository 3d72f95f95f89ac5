//! Minimal cookie jar: parses the incoming `Cookie` header and collects
//! outgoing `Set-Cookie` values.
//!
//! Reads through the jar see pending writes, so a handler that creates and
//! then inspects a session in the same request gets the new token back.

use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;

use axum::extract::FromRequestParts;
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponseParts, ResponseParts};
use tracing::warn;

/// `SameSite` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SameSite {
    #[default]
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn as_str(self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// One outgoing cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: String,
    pub domain: Option<String>,
    pub max_age_secs: i64,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
}

impl Cookie {
    /// `Path=/`, `SameSite=Strict`, `HttpOnly`, not `Secure`, session-length.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: "/".to_string(),
            domain: None,
            max_age_secs: 0,
            http_only: true,
            secure: false,
            same_site: SameSite::Strict,
        }
    }

    pub fn max_age(mut self, secs: i64) -> Self {
        self.max_age_secs = secs.max(0);
        self
    }

    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn domain(mut self, domain: Option<String>) -> Self {
        self.domain = domain;
        self
    }

    /// Whether this write deletes the cookie on the client.
    pub fn is_removal(&self) -> bool {
        self.max_age_secs == 0 && self.value.is_empty()
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={}; Path={}; Max-Age={}",
            self.name, self.value, self.path, self.max_age_secs
        )?;
        if let Some(domain) = &self.domain {
            write!(f, "; Domain={domain}")?;
        }
        if self.http_only {
            f.write_str("; HttpOnly")?;
        }
        if self.secure {
            f.write_str("; Secure")?;
        }
        write!(f, "; SameSite={}", self.same_site.as_str())
    }
}

/// Request cookies plus pending response cookies.
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    incoming: HashMap<String, String>,
    outgoing: Vec<Cookie>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse every `Cookie` header. Malformed pairs are skipped; the first
    /// occurrence of a name wins.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut incoming = HashMap::new();
        for value in headers.get_all(COOKIE) {
            let Ok(raw) = value.to_str() else {
                continue;
            };
            for pair in raw.split(';') {
                if let Some((name, value)) = pair.split_once('=') {
                    let name = name.trim();
                    if !name.is_empty() {
                        incoming
                            .entry(name.to_string())
                            .or_insert_with(|| value.trim().trim_matches('"').to_string());
                    }
                }
            }
        }

        Self {
            incoming,
            outgoing: Vec::new(),
        }
    }

    /// Current value of `name`, with pending writes applied. Empty values
    /// read as absent.
    pub fn get(&self, name: &str) -> Option<&str> {
        let value = match self.outgoing.iter().rev().find(|c| c.name == name) {
            Some(cookie) if cookie.is_removal() => return None,
            Some(cookie) => cookie.value.as_str(),
            None => self.incoming.get(name)?.as_str(),
        };
        (!value.is_empty()).then_some(value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Queue a `Set-Cookie`. A later write to the same name supersedes it.
    pub fn set(&mut self, cookie: Cookie) {
        self.outgoing.retain(|c| c.name != cookie.name);
        self.outgoing.push(cookie);
    }

    /// Pending `Set-Cookie` values.
    pub fn outgoing(&self) -> &[Cookie] {
        &self.outgoing
    }

    /// Append every pending cookie to `headers`.
    pub fn write_to(&self, headers: &mut HeaderMap) {
        for cookie in &self.outgoing {
            match HeaderValue::from_str(&cookie.to_string()) {
                Ok(value) => {
                    headers.append(SET_COOKIE, value);
                }
                Err(e) => {
                    warn!(cookie = %cookie.name, error = %e, "Dropping unrepresentable cookie")
                }
            }
        }
    }
}

impl<S> FromRequestParts<S> for CookieJar
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}

impl IntoResponseParts for CookieJar {
    type Error = Infallible;

    fn into_response_parts(self, mut res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        self.write_to(res.headers_mut());
        Ok(res)
    }
}

/// Whether `headers` carry a non-empty cookie called `name`.
pub fn has_cookie(headers: &HeaderMap, name: &str) -> bool {
    CookieJar::from_headers(headers).contains(name)
}
