//! User directory consulted during login and session validation.
//!
//! The session layer only needs id lookup (to re-check that a user still
//! exists and is active) and credential verification (login). The
//! in-memory implementation stores Argon2id hashes; a database-backed
//! directory implements the same trait.

use std::fmt;
use std::str::FromStr;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppError, AppResult};

/// Authorization role carried in session tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    User,
    Moderator,
    Admin,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Moderator => "moderator",
            UserRole::Admin => "admin",
        }
    }

    pub fn is_admin(self) -> bool {
        matches!(self, UserRole::Admin)
    }
}

impl FromStr for UserRole {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(UserRole::User),
            "moderator" => Ok(UserRole::Moderator),
            "admin" => Ok(UserRole::Admin),
            other => Err(AppError::BadRequest(format!("Unknown role: {other}"))),
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directory record. Never carries credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: UserRole,
    pub is_active: bool,
}

/// Lookup interface for user records.
#[async_trait]
pub trait UserDirectory: Send + Sync + fmt::Debug {
    async fn find_by_id(&self, id: &str) -> AppResult<Option<User>>;

    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>>;

    /// The user whose password matches, or `None`. Inactive users never match.
    async fn verify_credentials(&self, email: &str, password: &str) -> AppResult<Option<User>>;
}

#[derive(Debug, Clone)]
struct StoredUser {
    user: User,
    password_hash: String,
}

/// Process-local directory backed by [`DashMap`].
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: DashMap<String, StoredUser>,
    ids_by_email: DashMap<String, String>,
    argon2: Argon2<'static>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace `user`, hashing `password` with Argon2id.
    ///
    /// # Errors
    ///
    /// `AppError::BadRequest` for an empty password, `AppError::Internal` if
    /// hashing fails.
    pub fn insert(&self, user: User, password: &str) -> AppResult<()> {
        if password.is_empty() {
            return Err(AppError::BadRequest("Password cannot be empty".to_string()));
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AppError::Internal(format!("Failed to hash password: {e}")))?
            .to_string();

        self.ids_by_email
            .insert(normalize_email(&user.email), user.id.clone());
        self.users.insert(
            user.id.clone(),
            StoredUser {
                user,
                password_hash,
            },
        );
        Ok(())
    }

    /// Toggle the active flag. Returns `false` if the user does not exist.
    pub fn set_active(&self, id: &str, active: bool) -> bool {
        match self.users.get_mut(id) {
            Some(mut stored) => {
                stored.user.is_active = active;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &str) -> Option<User> {
        let (_, stored) = self.users.remove(id)?;
        self.ids_by_email.remove(&normalize_email(&stored.user.email));
        Some(stored.user)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    fn stored_by_email(&self, email: &str) -> Option<StoredUser> {
        let id = self.ids_by_email.get(&normalize_email(email))?.value().clone();
        self.users.get(&id).map(|s| s.value().clone())
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_by_id(&self, id: &str) -> AppResult<Option<User>> {
        Ok(self.users.get(id).map(|s| s.user.clone()))
    }

    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>> {
        Ok(self.stored_by_email(email).map(|s| s.user))
    }

    async fn verify_credentials(&self, email: &str, password: &str) -> AppResult<Option<User>> {
        let Some(stored) = self.stored_by_email(email) else {
            debug!("Login attempt for unknown email");
            return Ok(None);
        };

        let Ok(parsed) = PasswordHash::new(&stored.password_hash) else {
            return Err(AppError::Internal("Stored password hash is corrupt".to_string()));
        };
        if self
            .argon2
            .verify_password(password.as_bytes(), &parsed)
            .is_err()
        {
            return Ok(None);
        }

        Ok(stored.user.is_active.then_some(stored.user))
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}
