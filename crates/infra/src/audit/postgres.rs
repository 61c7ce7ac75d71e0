//! Postgres-backed audit log (`audit_log` table).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::instrument;

use portal_core::{AuditAction, AuditEvent, NetworkMetadata};

use super::{AuditError, AuditSink};

#[derive(Debug, Clone)]
pub struct PostgresAuditSink {
    pool: Arc<PgPool>,
}

impl PostgresAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the `audit_log` table and its subject/time index if missing.
    pub async fn ensure_schema(&self) -> Result<(), AuditError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id           UUID PRIMARY KEY,
                subject      TEXT NOT NULL,
                action       TEXT NOT NULL,
                occurred_at  TIMESTAMPTZ NOT NULL,
                detail       TEXT NOT NULL DEFAULT '',
                ip           TEXT NULL,
                user_agent   TEXT NULL
            )
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("ensure_schema", e))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS audit_log_subject_time_idx ON audit_log (subject, occurred_at DESC)",
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

#[async_trait]
impl AuditSink for PostgresAuditSink {
    #[instrument(skip(self, event), fields(action = %event.action), err)]
    async fn append(&self, event: AuditEvent) -> Result<(), AuditError> {
        let network = event.network.unwrap_or_default();
        sqlx::query(
            r#"
            INSERT INTO audit_log (id, subject, action, occurred_at, detail, ip, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.id)
        .bind(&event.subject)
        .bind(event.action.as_str())
        .bind(event.timestamp)
        .bind(&event.detail)
        .bind(network.ip)
        .bind(network.user_agent)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("append", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn recent_for_subject(
        &self,
        subject: &str,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, AuditError> {
        let rows = sqlx::query(
            r#"
            SELECT id, subject, action, occurred_at, detail, ip, user_agent
            FROM audit_log
            WHERE subject = $1
            ORDER BY occurred_at DESC
            LIMIT $2
            "#,
        )
        .bind(subject)
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("recent_for_subject", e))?;

        rows.iter().map(event_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AuditError> {
        let result = sqlx::query("DELETE FROM audit_log WHERE occurred_at < $1")
            .bind(cutoff)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("purge_older_than", e))?;
        Ok(result.rows_affected())
    }
}

fn event_from_row(row: &PgRow) -> Result<AuditEvent, AuditError> {
    let decode = |e: sqlx::Error| AuditError::Unavailable(format!("failed to decode audit row: {e}"));

    let action: String = row.try_get("action").map_err(decode)?;
    let ip: Option<String> = row.try_get("ip").map_err(decode)?;
    let user_agent: Option<String> = row.try_get("user_agent").map_err(decode)?;

    Ok(AuditEvent {
        id: row.try_get("id").map_err(decode)?,
        subject: row.try_get("subject").map_err(decode)?,
        action: AuditAction::parse(&action)
            .ok_or_else(|| AuditError::Unavailable(format!("unknown audit action '{action}'")))?,
        timestamp: row.try_get("occurred_at").map_err(decode)?,
        detail: row.try_get("detail").map_err(decode)?,
        network: (ip.is_some() || user_agent.is_some()).then_some(NetworkMetadata { ip, user_agent }),
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> AuditError {
    AuditError::Unavailable(format!("sqlx error in {operation}: {err}"))
}
