//! `portal-core`: student portal domain building blocks.
//!
//! This crate contains **pure domain** values (no infrastructure concerns).

pub mod account;
pub mod audit;
pub mod error;
pub mod id;

pub use account::{Account, AccountDraft, Email, PasswordHash, Profile, ProfileUpdate};
pub use audit::{AuditAction, AuditEvent, NetworkMetadata};
pub use error::{DomainError, DomainResult};
pub use id::{IdentifierLayout, Partition, StudentNumber};
