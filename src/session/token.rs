//! Session token codecs.
//!
//! Two schemes are accepted:
//!
//! - **current**: JWT, HS256, claims [`SessionClaims`].
//! - **legacy**: `v0.<b64url(claims json)>.<b64url(HMAC-SHA256)>`, accepted
//!   during migration so existing sessions survive the switch.
//!
//! Each codec checks signature and expiry on its own. Expiry is always
//! compared against the injected clock, never against the system time, so
//! `jsonwebtoken`'s built-in `exp` validation is disabled.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Secret;
use crate::directory::{User, UserRole};
use crate::signing::Signer;

use super::SessionError;

/// Version tag of the legacy format.
pub const LEGACY_PREFIX: &str = "v0";

/// Claims embedded in every session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// User id.
    pub sub: String,
    pub email: String,
    pub role: UserRole,
    /// Issued at, unix seconds.
    pub iat: i64,
    /// Expires at, unix seconds.
    pub exp: i64,
    /// Unique token id.
    pub jti: String,
}

impl SessionClaims {
    pub fn new(user: &User, issued_at: DateTime<Utc>, ttl: TimeDelta) -> Self {
        Self {
            sub: user.id.clone(),
            email: user.email.clone(),
            role: user.role,
            iat: issued_at.timestamp(),
            exp: issued_at
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
                .timestamp(),
            jti: Uuid::new_v4().to_string(),
        }
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.iat, 0)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }

    /// A token is dead from its `exp` second onward.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }

    fn check_expiry(self, now: DateTime<Utc>) -> Result<Self, SessionError> {
        if self.is_expired_at(now) {
            Err(SessionError::Expired)
        } else {
            Ok(self)
        }
    }
}

/// HS256 JWT codec.
pub struct CurrentTokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl CurrentTokenCodec {
    pub fn new(secret: &Secret) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn encode(&self, claims: &SessionClaims) -> Result<String, SessionError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| SessionError::Signing(e.to_string()))
    }

    /// Check signature and expiry.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, SessionError> {
        let data = jsonwebtoken::decode::<SessionClaims>(token, &self.decoding, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => SessionError::BadSignature,
                _ => SessionError::Malformed,
            })?;
        data.claims.check_expiry(now)
    }
}

impl std::fmt::Debug for CurrentTokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CurrentTokenCodec").finish_non_exhaustive()
    }
}

/// Pre-JWT compact codec.
#[derive(Debug, Clone)]
pub struct LegacyTokenCodec {
    signer: Signer,
}

impl LegacyTokenCodec {
    pub fn new(signer: Signer) -> Self {
        Self { signer }
    }

    /// Mint a legacy token. Only needed to exercise the migration path.
    pub fn encode(&self, claims: &SessionClaims) -> Result<String, SessionError> {
        let json = serde_json::to_vec(claims).map_err(|e| SessionError::Signing(e.to_string()))?;
        let payload = format!("{LEGACY_PREFIX}.{}", URL_SAFE_NO_PAD.encode(json));
        let tag = self.signer.sign_encoded(payload.as_bytes());
        Ok(format!("{payload}.{tag}"))
    }

    /// Check signature and expiry.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, SessionError> {
        let (payload, tag) = token.rsplit_once('.').ok_or(SessionError::Malformed)?;
        let (version, body) = payload.split_once('.').ok_or(SessionError::Malformed)?;
        if version != LEGACY_PREFIX || body.is_empty() {
            return Err(SessionError::Malformed);
        }

        if !self.signer.verify_encoded(payload.as_bytes(), tag) {
            return Err(SessionError::BadSignature);
        }

        let json = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| SessionError::Malformed)?;
        let claims: SessionClaims =
            serde_json::from_slice(&json).map_err(|_| SessionError::Malformed)?;
        claims.check_expiry(now)
    }
}
