//! Student account model.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::StudentNumber;

/// Case-normalized email address (trimmed + lowercased).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl Email {
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let normalized = raw.trim().to_lowercase();
        if !looks_like_email(&normalized) {
            return Err(DomainError::validation("please provide a valid email address"));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn looks_like_email(s: &str) -> bool {
    if s.chars().any(char::is_whitespace) {
        return false;
    }
    let mut parts = s.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    if local.is_empty() {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}

impl core::fmt::Display for Email {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Email {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Email> for String {
    fn from(value: Email) -> Self {
        value.0
    }
}

/// Opaque credential hash as stored. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordHash(String);

impl PasswordHash {
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("PasswordHash(<redacted>)")
    }
}

/// Free-form profile fields. Only `full_name` is required.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub full_name: String,
    pub birth_date: Option<NaiveDate>,
    pub gender: String,
    pub religion: String,
    pub mobile: String,
    pub address: String,
    pub course: String,
    pub year_level: String,
}

impl Profile {
    /// Trim every field and require a non-blank name.
    pub fn normalized(mut self) -> DomainResult<Self> {
        for field in [
            &mut self.full_name,
            &mut self.gender,
            &mut self.religion,
            &mut self.mobile,
            &mut self.address,
            &mut self.course,
            &mut self.year_level,
        ] {
            *field = field.trim().to_string();
        }
        if self.full_name.is_empty() {
            return Err(DomainError::validation("full name is required"));
        }
        Ok(self)
    }
}

/// Partial profile replacement. Email and student number are immutable and
/// therefore not representable here.
///
/// `birth_date` is the only optional profile field, so it has three states:
/// `None` leaves it alone, `Some(None)` clears it, `Some(Some(d))` sets it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub birth_date: Option<Option<NaiveDate>>,
    pub gender: Option<String>,
    pub religion: Option<String>,
    pub mobile: Option<String>,
    pub address: Option<String>,
    pub course: Option<String>,
    pub year_level: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Trim every present text field. A present `full_name` must not be blank.
    pub fn normalized(mut self) -> DomainResult<Self> {
        for field in [
            &mut self.full_name,
            &mut self.gender,
            &mut self.religion,
            &mut self.mobile,
            &mut self.address,
            &mut self.course,
            &mut self.year_level,
        ]
        .into_iter()
        .flatten()
        {
            *field = field.trim().to_string();
        }
        if self.full_name.as_deref().is_some_and(str::is_empty) {
            return Err(DomainError::validation("full name is required"));
        }
        Ok(self)
    }

    /// Names of the fields this update touches (for audit details).
    pub fn changed_fields(&self) -> Vec<&'static str> {
        [
            ("full_name", self.full_name.is_some()),
            ("birth_date", self.birth_date.is_some()),
            ("gender", self.gender.is_some()),
            ("religion", self.religion.is_some()),
            ("mobile", self.mobile.is_some()),
            ("address", self.address.is_some()),
            ("course", self.course.is_some()),
            ("year_level", self.year_level.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, present)| present.then_some(name))
        .collect()
    }

    /// Overwrite the fields this update names, leaving the rest of `profile`
    /// untouched. Stores call this against the latest stored row.
    pub fn merge_into(&self, profile: &mut Profile) {
        let text = [
            (&self.full_name, &mut profile.full_name),
            (&self.gender, &mut profile.gender),
            (&self.religion, &mut profile.religion),
            (&self.mobile, &mut profile.mobile),
            (&self.address, &mut profile.address),
            (&self.course, &mut profile.course),
            (&self.year_level, &mut profile.year_level),
        ];
        for (update, field) in text {
            if let Some(v) = update {
                field.clone_from(v);
            }
        }
        if let Some(birth_date) = self.birth_date {
            profile.birth_date = birth_date;
        }
    }
}

/// Everything needed to create an account except its student number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountDraft {
    pub email: Email,
    pub password_hash: PasswordHash,
    pub profile: Profile,
}

impl AccountDraft {
    pub fn into_account(self, student_number: StudentNumber, now: DateTime<Utc>) -> Account {
        Account {
            student_number,
            email: self.email,
            password_hash: self.password_hash,
            profile: self.profile,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A registered student.
///
/// # Invariants
/// - `student_number` and `email` are assigned at creation and never change.
/// - `password_hash` never leaves the service boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub student_number: StudentNumber,
    pub email: Email,
    pub password_hash: PasswordHash,
    pub profile: Profile,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_is_normalized() {
        let e = Email::parse("  Juan.Dela.Cruz@HAU.edu.PH ").unwrap();
        assert_eq!(e.as_str(), "juan.dela.cruz@hau.edu.ph");
    }

    #[test]
    fn malformed_emails_are_rejected() {
        for bad in ["", "plain", "a@b", "@x.com", "a@.com", "a b@c.com", "a@b@c.com", "a@b."] {
            assert!(Email::parse(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn profile_requires_name() {
        let p = Profile {
            full_name: "   ".into(),
            ..Default::default()
        };
        assert!(p.normalized().is_err());
    }

    #[test]
    fn update_merges_only_present_fields() {
        let mut profile = Profile {
            full_name: "Maria Santos".into(),
            course: "BSCS".into(),
            birth_date: NaiveDate::from_ymd_opt(2004, 3, 9),
            ..Default::default()
        }
        .normalized()
        .unwrap();

        let update = ProfileUpdate {
            mobile: Some(" 0917 000 0000 ".into()),
            ..Default::default()
        }
        .normalized()
        .unwrap();
        update.merge_into(&mut profile);
        assert_eq!(profile.full_name, "Maria Santos");
        assert_eq!(profile.course, "BSCS");
        assert_eq!(profile.mobile, "0917 000 0000");
        assert!(profile.birth_date.is_some());
        assert_eq!(update.changed_fields(), vec!["mobile"]);

        let blank_name = ProfileUpdate {
            full_name: Some("  ".into()),
            ..Default::default()
        };
        assert!(blank_name.normalized().is_err());
    }

    #[test]
    fn update_can_clear_birth_date() {
        let mut profile = Profile {
            full_name: "Maria Santos".into(),
            birth_date: NaiveDate::from_ymd_opt(2004, 3, 9),
            ..Default::default()
        };
        let clear = ProfileUpdate {
            birth_date: Some(None),
            ..Default::default()
        };
        assert!(!clear.is_empty());
        assert_eq!(clear.changed_fields(), vec!["birth_date"]);

        clear.merge_into(&mut profile);
        assert_eq!(profile.birth_date, None);
    }

    #[test]
    fn password_hash_debug_is_redacted() {
        let h = PasswordHash::new("$argon2id$v=19$secret");
        assert!(!format!("{h:?}").contains("secret"));
    }
}
