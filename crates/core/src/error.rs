//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Failures of pure domain values. Storage and transport errors live in
/// `portal-infra` and `portal-api`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed user input (email, profile, partition key).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A student number that does not parse.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A sequence does not fit the fixed identifier width.
    #[error("sequence {sequence} does not fit in {width} digits")]
    SequenceOverflow { sequence: u64, width: u32 },
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
