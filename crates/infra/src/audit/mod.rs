//! Append-only audit log of account lifecycle events.
//!
//! Audit writes are fire-and-forget from the caller's perspective: use
//! [`record`] so a failing sink is logged and never fails the operation that
//! produced the event.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use portal_core::AuditEvent;

pub use in_memory::InMemoryAuditSink;
pub use postgres::PostgresAuditSink;

/// Default page size for activity queries.
pub const DEFAULT_RECENT_LIMIT: usize = 50;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, event: AuditEvent) -> Result<(), AuditError>;

    /// Newest first, at most `limit` events.
    async fn recent_for_subject(
        &self,
        subject: &str,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, AuditError>;

    /// Remove events strictly older than `cutoff`; returns how many were removed.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AuditError>;
}

#[async_trait]
impl<S> AuditSink for Arc<S>
where
    S: AuditSink + ?Sized,
{
    async fn append(&self, event: AuditEvent) -> Result<(), AuditError> {
        (**self).append(event).await
    }

    async fn recent_for_subject(
        &self,
        subject: &str,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, AuditError> {
        (**self).recent_for_subject(subject, limit).await
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AuditError> {
        (**self).purge_older_than(cutoff).await
    }
}

/// Append `event`, logging instead of propagating a sink failure.
pub async fn record(sink: &dyn AuditSink, event: AuditEvent) {
    let action = event.action;
    if let Err(e) = sink.append(event).await {
        tracing::warn!(%action, error = %e, "failed to write audit event");
    }
}

/// How long audit events are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::days(90)
    }
}

impl RetentionPolicy {
    pub fn days(days: i64) -> Self {
        Self {
            max_age: Duration::days(days),
        }
    }

    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.max_age
    }

    /// Purge everything past retention from `sink`.
    pub async fn enforce(&self, sink: &dyn AuditSink, now: DateTime<Utc>) -> Result<u64, AuditError> {
        let removed = sink.purge_older_than(self.cutoff(now)).await?;
        if removed > 0 {
            tracing::info!(removed, max_age_days = self.max_age.num_days(), "expired audit events purged");
        }
        Ok(removed)
    }
}
