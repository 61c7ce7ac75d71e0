use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use portal_core::{Account, AuditEvent, Profile, ProfileUpdate};

use crate::app::services::{LoginIdentifier, Registration};

// -------------------------
// Request DTOs
// -------------------------

/// Registration form. Missing fields deserialize as blank so the service
/// can answer with a specific validation message instead of a parse error.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegisterRequest {
    pub full_name: String,
    #[serde(deserialize_with = "blank_as_none")]
    pub birth_date: Option<NaiveDate>,
    pub gender: String,
    pub religion: String,
    pub email: String,
    pub mobile: String,
    pub address: String,
    pub course: String,
    pub year_level: String,
    pub password: String,
    pub confirm_password: Option<String>,
}

impl RegisterRequest {
    pub fn into_registration(self) -> Registration {
        Registration {
            email: self.email,
            password: self.password,
            confirm_password: self.confirm_password,
            profile: Profile {
                full_name: self.full_name,
                birth_date: self.birth_date,
                gender: self.gender,
                religion: self.religion,
                mobile: self.mobile,
                address: self.address,
                course: self.course,
                year_level: self.year_level,
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub student_number: Option<String>,
    pub password: String,
}

impl LoginRequest {
    /// Student number wins when both identifiers are present.
    pub fn identifier(&self) -> Option<LoginIdentifier> {
        let present = |v: &Option<String>| v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(String::from);
        present(&self.student_number)
            .map(LoginIdentifier::StudentNumber)
            .or_else(|| present(&self.email).map(LoginIdentifier::Email))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateProfileRequest {
    pub full_name: Option<String>,
    /// Absent keeps the stored date; `null` or `""` clears it.
    #[serde(deserialize_with = "clearable_date")]
    pub birth_date: Option<Option<NaiveDate>>,
    pub gender: Option<String>,
    pub religion: Option<String>,
    pub mobile: Option<String>,
    pub address: Option<String>,
    pub course: Option<String>,
    pub year_level: Option<String>,
}

impl From<UpdateProfileRequest> for ProfileUpdate {
    fn from(req: UpdateProfileRequest) -> Self {
        ProfileUpdate {
            full_name: req.full_name,
            birth_date: req.birth_date,
            gender: req.gender,
            religion: req.religion,
            mobile: req.mobile,
            address: req.address,
            course: req.course,
            year_level: req.year_level,
        }
    }
}

/// Browsers submit an untouched date input as `""`.
fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s
            .parse::<NaiveDate>()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// Only called when the key is present, so every outcome is `Some`.
fn clearable_date<'de, D>(deserializer: D) -> Result<Option<Option<NaiveDate>>, D::Error>
where
    D: Deserializer<'de>,
{
    blank_as_none(deserializer).map(Some)
}

// -------------------------
// Response DTOs
// -------------------------

/// Summary returned alongside a fresh token.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub student_number: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_sent: Option<bool>,
}

impl SessionData {
    pub fn new(account: &Account) -> Self {
        Self {
            student_number: account.student_number.to_string(),
            name: account.profile.full_name.clone(),
            email: account.email.to_string(),
            email_sent: None,
        }
    }
}

/// Full student record without credentials.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentView {
    pub student_number: String,
    pub name: String,
    pub email: String,
    pub birth_date: Option<NaiveDate>,
    pub gender: String,
    pub religion: String,
    pub mobile: String,
    pub address: String,
    pub course: String,
    pub year_level: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Account> for StudentView {
    fn from(account: &Account) -> Self {
        let p = &account.profile;
        Self {
            student_number: account.student_number.to_string(),
            name: p.full_name.clone(),
            email: account.email.to_string(),
            birth_date: p.birth_date,
            gender: p.gender.clone(),
            religion: p.religion.clone(),
            mobile: p.mobile.clone(),
            address: p.address.clone(),
            course: p.course.clone(),
            year_level: p.year_level.clone(),
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: String,
    pub student_number: String,
    pub action: &'static str,
    pub details: String,
    pub timestamp: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl From<AuditEvent> for LogEntry {
    fn from(event: AuditEvent) -> Self {
        let network = event.network.unwrap_or_default();
        Self {
            id: event.id.to_string(),
            student_number: event.subject,
            action: event.action.as_str(),
            details: event.detail,
            timestamp: event.timestamp,
            ip_address: network.ip,
            user_agent: network.user_agent,
        }
    }
}
