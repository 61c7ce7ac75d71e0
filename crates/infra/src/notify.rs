//! Registration notifications.
//!
//! [`SmtpNotifier`] mails the new student their number; [`LogNotifier`] is
//! the fallback when no mail credentials are configured. A failed
//! notification never fails the registration it belongs to.

use async_trait::async_trait;
use lettre::message::{Mailbox, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;

use portal_core::Account;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// Settings that can never produce a working transport.
    #[error("invalid notifier configuration: {0}")]
    Config(String),

    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait RegistrationNotifier: Send + Sync {
    /// `Ok(true)` when the notification was handed to a delivery channel,
    /// `Ok(false)` when no channel is configured.
    async fn notify_registered(&self, account: &Account) -> Result<bool, NotifyError>;

    /// Short channel name for startup logs.
    fn channel(&self) -> &'static str;
}

/// Notifier used when no delivery channel is configured: it only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl RegistrationNotifier for LogNotifier {
    async fn notify_registered(&self, account: &Account) -> Result<bool, NotifyError> {
        tracing::info!(
            student_number = %account.student_number,
            "registration notification skipped (no delivery channel configured)"
        );
        Ok(false)
    }

    fn channel(&self) -> &'static str {
        "log"
    }
}

/// SMTP relay settings (STARTTLS, authenticated).
#[derive(Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Sender mailbox, e.g. `HAU Portal <noreply@hau.edu.ph>`.
    pub from: String,
}

impl core::fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("from", &self.from)
            .finish()
    }
}

/// Sends the welcome mail through an SMTP relay.
///
/// Building the notifier does not open a connection; the relay is contacted
/// per message.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    pub fn new(settings: SmtpSettings) -> Result<Self, NotifyError> {
        let from: Mailbox = settings
            .from
            .parse()
            .map_err(|e| NotifyError::Config(format!("sender '{}': {e}", settings.from)))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            .map_err(|e| NotifyError::Config(format!("smtp relay '{}': {e}", settings.host)))?
            .port(settings.port)
            .credentials(Credentials::new(settings.username, settings.password))
            .build();

        Ok(Self { transport, from })
    }

    fn welcome_message(&self, account: &Account) -> Result<Message, NotifyError> {
        let address: Address = account
            .email
            .as_str()
            .parse()
            .map_err(|e| NotifyError::Delivery(format!("recipient address: {e}")))?;
        let to = Mailbox::new(Some(account.profile.full_name.clone()), address);

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject("Welcome to Holy Angel University Portal - Registration Successful")
            .header(ContentType::TEXT_PLAIN)
            .body(welcome_body(account))
            .map_err(|e| NotifyError::Delivery(format!("building message: {e}")))
    }
}

fn welcome_body(account: &Account) -> String {
    format!(
        "Dear {name},\n\n\
         Your registration to the Holy Angel University Student Portal has been successful.\n\n\
         Student Number (Username): {number}\n\n\
         You can now log in using your email or student number and the password you \
         created during registration.\n\n\
         If you did not register for this account, please contact the IT department immediately.\n",
        name = account.profile.full_name,
        number = account.student_number,
    )
}

impl core::fmt::Debug for SmtpNotifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SmtpNotifier")
            .field("from", &self.from.to_string())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RegistrationNotifier for SmtpNotifier {
    #[tracing::instrument(skip(self, account), fields(student_number = %account.student_number), err)]
    async fn notify_registered(&self, account: &Account) -> Result<bool, NotifyError> {
        let message = self.welcome_message(account)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;
        tracing::info!("registration email sent");
        Ok(true)
    }

    fn channel(&self) -> &'static str {
        "smtp"
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use portal_core::{AccountDraft, Email, PasswordHash, Profile};

    use super::*;

    fn settings() -> SmtpSettings {
        SmtpSettings {
            host: "smtp.example.com".into(),
            port: 587,
            username: "mailer".into(),
            password: "hunter22".into(),
            from: "HAU Portal <noreply@hau.edu.ph>".into(),
        }
    }

    fn account() -> Account {
        AccountDraft {
            email: Email::parse("juan@hau.edu.ph").unwrap(),
            password_hash: PasswordHash::new("h"),
            profile: Profile {
                full_name: "Juan Dela Cruz".into(),
                ..Default::default()
            },
        }
        .into_account("202500001".parse().unwrap(), Utc::now())
    }

    #[tokio::test]
    async fn log_notifier_reports_not_sent() {
        assert_eq!(LogNotifier.notify_registered(&account()).await, Ok(false));
        assert_eq!(LogNotifier.channel(), "log");
    }

    #[test]
    fn smtp_notifier_builds_without_connecting() {
        let notifier = SmtpNotifier::new(settings()).unwrap();
        assert_eq!(notifier.channel(), "smtp");
    }

    #[test]
    fn malformed_sender_is_a_config_error() {
        let err = SmtpNotifier::new(SmtpSettings {
            from: "not a mailbox".into(),
            ..settings()
        })
        .unwrap_err();
        assert!(matches!(err, NotifyError::Config(_)));
    }

    #[test]
    fn welcome_mail_names_the_student_number() {
        let notifier = SmtpNotifier::new(settings()).unwrap();
        let message = notifier.welcome_message(&account()).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("202500001"));
        assert!(raw.contains("juan@hau.edu.ph"));
    }

    #[test]
    fn settings_debug_hides_password() {
        assert!(!format!("{:?}", settings()).contains("hunter22"));
    }
}
