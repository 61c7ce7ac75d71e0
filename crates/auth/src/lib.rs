//! `portal-auth`: session tokens and credential hashing.
//!
//! This crate is intentionally decoupled from HTTP and storage.

pub mod claims;
pub mod jwt;
pub mod password;

pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256Jwt, JwtValidator, TokenError, TokenIssuer};
pub use password::{Argon2Hasher, CredentialError, CredentialHasher, MIN_PASSWORD_LEN};
