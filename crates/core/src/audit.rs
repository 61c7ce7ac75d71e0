//! Account lifecycle audit events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of audited actions.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Registration,
    LoginSuccess,
    LoginFailed,
    ProfileUpdate,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Registration => "REGISTRATION",
            AuditAction::LoginSuccess => "LOGIN_SUCCESS",
            AuditAction::LoginFailed => "LOGIN_FAILED",
            AuditAction::ProfileUpdate => "PROFILE_UPDATE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "REGISTRATION" => Some(AuditAction::Registration),
            "LOGIN_SUCCESS" => Some(AuditAction::LoginSuccess),
            "LOGIN_FAILED" => Some(AuditAction::LoginFailed),
            "PROFILE_UPDATE" => Some(AuditAction::ProfileUpdate),
            _ => None,
        }
    }
}

impl core::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a request came from, when the transport knows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkMetadata {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    /// Student number, or the attempted login identifier for failed logins.
    pub subject: String,
    pub action: AuditAction,
    pub timestamp: DateTime<Utc>,
    pub detail: String,
    pub network: Option<NetworkMetadata>,
}

impl AuditEvent {
    pub fn new(
        subject: impl Into<String>,
        action: AuditAction,
        detail: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            subject: subject.into(),
            action,
            timestamp,
            detail: detail.into(),
            network: None,
        }
    }

    pub fn with_network(mut self, network: Option<NetworkMetadata>) -> Self {
        self.network = network;
        self
    }
}
