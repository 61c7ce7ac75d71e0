//! Account persistence boundary.
//!
//! The store is the only shared mutable resource of the portal. Every
//! mutation goes through [`AccountStore::insert_unique`] or
//! [`AccountStore::update_profile`], and the store alone decides uniqueness of
//! student numbers and emails.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use portal_core::{Account, Email, Partition, ProfileUpdate, StudentNumber};

pub use in_memory::InMemoryAccountStore;
pub use postgres::PostgresAccountStore;

/// Column guarded by a uniqueness constraint.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UniqueField {
    StudentNumber,
    Email,
}

impl core::fmt::Display for UniqueField {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            UniqueField::StudentNumber => f.write_str("student_number"),
            UniqueField::Email => f.write_str("email"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("uniqueness violation on {0}")]
    Conflict(UniqueField),

    #[error("record not found")]
    NotFound,

    /// Connectivity, pool, decoding or any other storage failure.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Highest stored student number that starts with `partition` and has
    /// exactly `identifier_len` characters.
    async fn find_max_student_number(
        &self,
        partition: &Partition,
        identifier_len: usize,
    ) -> Result<Option<StudentNumber>, StoreError>;

    /// Insert a new account, failing with [`StoreError::Conflict`] when either
    /// the student number or the email already exists.
    async fn insert_unique(&self, account: Account) -> Result<Account, StoreError>;

    async fn find_by_email(&self, email: &Email) -> Result<Option<Account>, StoreError>;

    async fn find_by_student_number(
        &self,
        number: &StudentNumber,
    ) -> Result<Option<Account>, StoreError>;

    /// Merge `update` into the stored profile in one write. Fields the update
    /// does not name keep whatever value the store holds at that moment.
    async fn update_profile(
        &self,
        number: &StudentNumber,
        update: &ProfileUpdate,
        now: DateTime<Utc>,
    ) -> Result<Account, StoreError>;

    /// Release underlying resources (connection pools). Idempotent.
    async fn close(&self) {}
}

#[async_trait]
impl<S> AccountStore for Arc<S>
where
    S: AccountStore + ?Sized,
{
    async fn find_max_student_number(
        &self,
        partition: &Partition,
        identifier_len: usize,
    ) -> Result<Option<StudentNumber>, StoreError> {
        (**self).find_max_student_number(partition, identifier_len).await
    }

    async fn insert_unique(&self, account: Account) -> Result<Account, StoreError> {
        (**self).insert_unique(account).await
    }

    async fn find_by_email(&self, email: &Email) -> Result<Option<Account>, StoreError> {
        (**self).find_by_email(email).await
    }

    async fn find_by_student_number(
        &self,
        number: &StudentNumber,
    ) -> Result<Option<Account>, StoreError> {
        (**self).find_by_student_number(number).await
    }

    async fn update_profile(
        &self,
        number: &StudentNumber,
        update: &ProfileUpdate,
        now: DateTime<Utc>,
    ) -> Result<Account, StoreError> {
        (**self).update_profile(number, update, now).await
    }

    async fn close(&self) {
        (**self).close().await
    }
}
