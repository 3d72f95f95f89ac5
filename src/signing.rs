//! HMAC-SHA256 signing with base64url (no padding) output.
//!
//! The key is absorbed once at construction; every `sign` call clones the
//! keyed state, so per-request signing has no fallible step. Verification
//! compares digests in constant time.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::Secret;
use crate::error::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

/// Keyed HMAC-SHA256 signer.
#[derive(Clone)]
pub struct Signer {
    mac: HmacSha256,
}

impl Signer {
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the secret is empty.
    pub fn new(secret: &Secret) -> AppResult<Self> {
        if secret.is_empty() {
            return Err(AppError::ConfigError("signing secret is empty".to_string()));
        }
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| AppError::ConfigError(format!("invalid signing key: {e}")))?;
        Ok(Self { mac })
    }

    /// Raw 32-byte tag over `message`.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(message);
        mac.finalize().into_bytes().to_vec()
    }

    /// base64url tag over `message`.
    pub fn sign_encoded(&self, message: &[u8]) -> String {
        URL_SAFE_NO_PAD.encode(self.sign(message))
    }

    /// Check a base64url tag. Malformed encodings are simply invalid.
    pub fn verify_encoded(&self, message: &[u8], tag: &str) -> bool {
        let Ok(provided) = URL_SAFE_NO_PAD.decode(tag) else {
            return false;
        };
        let expected = self.sign(message);

        // ct_eq on slices of different length returns false without leaking where.
        expected.ct_eq(&provided).into()
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let signer = Signer::new(&Secret::new("k")).unwrap();
        let tag = signer.sign_encoded(b"payload");

        assert!(signer.verify_encoded(b"payload", &tag));
        assert!(!signer.verify_encoded(b"payload2", &tag));
        assert!(!signer.verify_encoded(b"payload", "not base64!"));
    }

    #[test]
    fn test_different_keys_disagree() {
        let a = Signer::new(&Secret::new("key-a")).unwrap();
        let b = Signer::new(&Secret::new("key-b")).unwrap();

        assert!(!b.verify_encoded(b"m", &a.sign_encoded(b"m")));
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(Signer::new(&Secret::new("")).is_err());
    }
}
