//! One-way credential hashing.
//!
//! Plaintext passwords only ever pass through this module; they are never
//! logged, stored or returned.

use argon2::Argon2;
use argon2::password_hash::{self, PasswordHasher, PasswordVerifier, SaltString};
use rand_core::OsRng;
use thiserror::Error;

use portal_core::PasswordHash;

/// Shortest accepted password at registration.
pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("password hashing failed: {0}")]
    Hashing(String),
}

/// Salted one-way hash + verification.
pub trait CredentialHasher: Send + Sync {
    fn hash(&self, plaintext: &str) -> Result<PasswordHash, CredentialError>;

    /// `false` covers both a mismatch and a stored hash that cannot be parsed.
    fn verify(&self, plaintext: &str, hash: &PasswordHash) -> bool;
}

/// Argon2id with a fresh random salt per hash (PHC string encoding).
#[derive(Default, Clone)]
pub struct Argon2Hasher {
    argon2: Argon2<'static>,
}

impl Argon2Hasher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl core::fmt::Debug for Argon2Hasher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("Argon2Hasher")
    }
}

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, plaintext: &str) -> Result<PasswordHash, CredentialError> {
        let salt = SaltString::generate(&mut OsRng);
        let encoded = self
            .argon2
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(|e| CredentialError::Hashing(e.to_string()))?;
        Ok(PasswordHash::new(encoded.to_string()))
    }

    fn verify(&self, plaintext: &str, hash: &PasswordHash) -> bool {
        let parsed = match password_hash::PasswordHash::new(hash.expose()) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "stored credential hash is unparseable");
                return false;
            }
        };
        self.argon2
            .verify_password(plaintext.as_bytes(), &parsed)
            .is_ok()
    }
}
