use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use portal_core::AuditEvent;

use super::{AuditError, AuditSink};

/// In-memory audit log for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    events: RwLock<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> AuditError {
        AuditError::Unavailable("lock poisoned".to_string())
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn append(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.events.write().map_err(|_| Self::poisoned())?.push(event);
        Ok(())
    }

    async fn recent_for_subject(
        &self,
        subject: &str,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, AuditError> {
        let events = self.events.read().map_err(|_| Self::poisoned())?;
        let mut matching: Vec<AuditEvent> = events
            .iter()
            .filter(|e| e.subject == subject)
            .cloned()
            .collect();
        // Stable sort keeps insertion order among equal timestamps; reverse it too.
        matching.reverse();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AuditError> {
        let mut events = self.events.write().map_err(|_| Self::poisoned())?;
        let before = events.len();
        events.retain(|e| e.timestamp >= cutoff);
        Ok((before - events.len()) as u64)
    }
}
