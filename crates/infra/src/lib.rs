//! `portal-infra`: storage, allocation and side-channel adapters.

pub mod allocator;
pub mod audit;
pub mod notify;
pub mod retry;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use allocator::{AllocationError, SequenceAllocator};
pub use audit::{AuditError, AuditSink, InMemoryAuditSink, PostgresAuditSink, RetentionPolicy};
pub use notify::{LogNotifier, NotifyError, RegistrationNotifier, SmtpNotifier, SmtpSettings};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use store::{AccountStore, InMemoryAccountStore, PostgresAccountStore, StoreError, UniqueField};
