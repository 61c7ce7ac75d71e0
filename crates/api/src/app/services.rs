//! Service wiring and the student-portal use cases behind the HTTP routes.
//!
//! Stores are constructed once at startup (in-memory or Postgres) and handed
//! to [`AppServices`]; handlers only ever see this type.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use portal_auth::{
    Argon2Hasher, CredentialError, CredentialHasher, Hs256Jwt, JwtValidator, MIN_PASSWORD_LEN,
    TokenError, TokenIssuer,
};
use portal_core::{
    Account, AccountDraft, AuditAction, AuditEvent, DomainError, Email, NetworkMetadata,
    PasswordHash, Partition, Profile, ProfileUpdate, StudentNumber,
};
use portal_infra::{
    AccountStore, AllocationError, AuditError, AuditSink, InMemoryAccountStore, InMemoryAuditSink,
    LogNotifier, PostgresAccountStore, PostgresAuditSink, RegistrationNotifier, RetentionPolicy,
    SequenceAllocator, SmtpNotifier, StoreError, UniqueField, audit,
};

use crate::config::Config;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("email address is already registered")]
    EmailTaken,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("forbidden")]
    Forbidden,

    #[error("student not found")]
    NotFound,

    /// Contention or sequence exhaustion while allocating a student number.
    #[error(transparent)]
    Allocation(AllocationError),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<DomainError> for ServiceError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => Self::Validation(msg),
            other @ DomainError::SequenceOverflow { .. } => Self::Internal(other.to_string()),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(UniqueField::Email) => Self::EmailTaken,
            StoreError::Conflict(UniqueField::StudentNumber) => {
                Self::Internal("unexpected student number conflict".to_string())
            }
            StoreError::NotFound => Self::NotFound,
            StoreError::Unavailable(msg) => Self::StoreUnavailable(msg),
        }
    }
}

impl From<AllocationError> for ServiceError {
    fn from(err: AllocationError) -> Self {
        match err {
            AllocationError::EmailTaken => Self::EmailTaken,
            AllocationError::StoreUnavailable(msg) => Self::StoreUnavailable(msg),
            other => Self::Allocation(other),
        }
    }
}

impl From<AuditError> for ServiceError {
    fn from(err: AuditError) -> Self {
        match err {
            AuditError::Unavailable(msg) => Self::StoreUnavailable(msg),
        }
    }
}

impl From<CredentialError> for ServiceError {
    fn from(err: CredentialError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<TokenError> for ServiceError {
    fn from(err: TokenError) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Raw registration input, validated by [`AppServices::register`].
#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub confirm_password: Option<String>,
    pub profile: Profile,
}

/// Which identity a login attempt names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginIdentifier {
    Email(String),
    StudentNumber(String),
}

impl LoginIdentifier {
    /// Audit subject for a failed attempt.
    fn subject(&self) -> String {
        match self {
            LoginIdentifier::Email(e) => e.trim().to_lowercase(),
            LoginIdentifier::StudentNumber(n) => n.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Registered {
    pub account: Account,
    pub token: String,
    /// Whether a registration notification was handed to a delivery channel.
    pub email_sent: bool,
}

#[derive(Debug, Clone)]
pub struct LoggedIn {
    pub account: Account,
    pub token: String,
}

pub struct AppServices {
    accounts: Arc<dyn AccountStore>,
    allocator: SequenceAllocator<Arc<dyn AccountStore>>,
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn RegistrationNotifier>,
    hasher: Arc<dyn CredentialHasher>,
    tokens: Arc<Hs256Jwt>,
    retention: RetentionPolicy,
}

impl AppServices {
    pub fn new(accounts: Arc<dyn AccountStore>, audit: Arc<dyn AuditSink>, config: &Config) -> Self {
        let allocator = SequenceAllocator::new(accounts.clone())
            .with_layout(config.layout)
            .with_retry_policy(config.retry_policy())
            .with_deadline(config.allocation_deadline);

        Self {
            accounts,
            allocator,
            audit,
            notifier: select_notifier(config),
            hasher: Arc::new(Argon2Hasher::new()),
            tokens: Arc::new(Hs256Jwt::new(config.jwt_secret.as_bytes(), config.token_ttl)),
            retention: RetentionPolicy::days(config.audit_retention_days),
        }
    }

    /// Development/test wiring: nothing survives a restart.
    pub fn in_memory(config: &Config) -> Self {
        Self::new(
            Arc::new(InMemoryAccountStore::new()),
            Arc::new(InMemoryAuditSink::new()),
            config,
        )
    }

    /// Production wiring against `DATABASE_URL`: one shared pool, schemas
    /// ensured, expired audit events purged once at startup.
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let url = config
            .database_url
            .as_deref()
            .context("DATABASE_URL is required for the Postgres stores")?;

        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await
            .context("failed to connect to Postgres")?;

        let accounts = PostgresAccountStore::new(pool.clone());
        accounts
            .ensure_schema()
            .await
            .context("failed to prepare students table")?;

        let audit = PostgresAuditSink::new(pool);
        audit
            .ensure_schema()
            .await
            .context("failed to prepare audit_log table")?;

        let services = Self::new(Arc::new(accounts), Arc::new(audit), config);
        if let Err(e) = services.enforce_retention(Utc::now()).await {
            tracing::warn!(error = %e, "audit retention purge failed at startup");
        }
        Ok(services)
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn RegistrationNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn accounts(&self) -> Arc<dyn AccountStore> {
        self.accounts.clone()
    }

    pub fn jwt_validator(&self) -> Arc<dyn JwtValidator> {
        self.tokens.clone()
    }

    /// Validate, allocate a student number, persist, audit, and notify.
    pub async fn register(
        &self,
        input: Registration,
        network: NetworkMetadata,
    ) -> Result<Registered, ServiceError> {
        if input.profile.full_name.trim().is_empty()
            || input.email.trim().is_empty()
            || input.password.is_empty()
        {
            return Err(ServiceError::Validation(
                "please provide all required fields (name, email, password)".to_string(),
            ));
        }
        let email = Email::parse(&input.email)
            .map_err(|_| ServiceError::Validation("please provide a valid email address".to_string()))?;
        if input.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ServiceError::Validation(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters long"
            )));
        }
        if input
            .confirm_password
            .as_deref()
            .is_some_and(|confirm| confirm != input.password)
        {
            return Err(ServiceError::Validation("passwords do not match".to_string()));
        }
        let profile = input.profile.normalized()?;

        // Fast path only; the store's unique constraint is authoritative.
        if self.accounts.find_by_email(&email).await?.is_some() {
            return Err(ServiceError::EmailTaken);
        }

        let password_hash = self.hash_password(input.password).await?;
        let now = Utc::now();
        let partition = Partition::current(now)?;

        let account = self
            .allocator
            .allocate(
                &partition,
                AccountDraft {
                    email,
                    password_hash,
                    profile,
                },
            )
            .await?;

        tracing::info!(student_number = %account.student_number, "student registered");

        audit::record(
            &*self.audit,
            AuditEvent::new(
                account.student_number.as_str(),
                AuditAction::Registration,
                format!("new student registered: {}", account.profile.full_name),
                now,
            )
            .with_network(Some(network)),
        )
        .await;

        let email_sent = match self.notifier.notify_registered(&account).await {
            Ok(sent) => sent,
            Err(e) => {
                tracing::warn!(student_number = %account.student_number, error = %e, "registration notification failed");
                false
            }
        };

        let token = self.tokens.issue(&account.student_number, now)?;
        Ok(Registered {
            account,
            token,
            email_sent,
        })
    }

    /// Verify credentials and issue a token. Unknown identity and wrong
    /// password are indistinguishable to the caller.
    pub async fn login(
        &self,
        identifier: LoginIdentifier,
        password: String,
        network: NetworkMetadata,
    ) -> Result<LoggedIn, ServiceError> {
        let now = Utc::now();
        let account = self.find_login_account(&identifier).await?;

        let Some(account) = account else {
            self.record_failed_login(identifier.subject(), "unknown account", &network, now)
                .await;
            return Err(ServiceError::InvalidCredentials);
        };

        if !self.verify_password(password, account.password_hash.clone()).await? {
            self.record_failed_login(
                account.student_number.to_string(),
                "incorrect password",
                &network,
                now,
            )
            .await;
            return Err(ServiceError::InvalidCredentials);
        }

        audit::record(
            &*self.audit,
            AuditEvent::new(
                account.student_number.as_str(),
                AuditAction::LoginSuccess,
                "student logged in successfully",
                now,
            )
            .with_network(Some(network)),
        )
        .await;

        let token = self.tokens.issue(&account.student_number, now)?;
        Ok(LoggedIn { account, token })
    }

    /// Look up any student by number.
    pub async fn student(&self, raw_number: &str) -> Result<Account, ServiceError> {
        let number: StudentNumber = raw_number.parse().map_err(|_| ServiceError::NotFound)?;
        self.accounts
            .find_by_student_number(&number)
            .await?
            .ok_or(ServiceError::NotFound)
    }

    /// Apply a partial profile update for the authenticated student. The store
    /// merges it into the current row, so `current` only names the account.
    pub async fn update_profile(
        &self,
        current: &Account,
        update: ProfileUpdate,
        network: NetworkMetadata,
    ) -> Result<Account, ServiceError> {
        let update = update.normalized()?;
        if update.is_empty() {
            return Err(ServiceError::Validation("no profile fields to update".to_string()));
        }
        let now = Utc::now();

        let updated = self
            .accounts
            .update_profile(&current.student_number, &update, now)
            .await?;

        audit::record(
            &*self.audit,
            AuditEvent::new(
                updated.student_number.as_str(),
                AuditAction::ProfileUpdate,
                format!("updated fields: {}", update.changed_fields().join(", ")),
                now,
            )
            .with_network(Some(network)),
        )
        .await;

        Ok(updated)
    }

    /// Newest audit events for `subject`; students may only read their own.
    pub async fn logs(
        &self,
        requester: &StudentNumber,
        subject: &str,
    ) -> Result<Vec<AuditEvent>, ServiceError> {
        if requester.as_str() != subject {
            return Err(ServiceError::Forbidden);
        }
        Ok(self
            .audit
            .recent_for_subject(subject, audit::DEFAULT_RECENT_LIMIT)
            .await?)
    }

    pub async fn enforce_retention(&self, now: DateTime<Utc>) -> Result<u64, ServiceError> {
        Ok(self.retention.enforce(&*self.audit, now).await?)
    }

    /// Release store handles. Called once at shutdown.
    pub async fn close(&self) {
        self.accounts.close().await;
    }

    async fn find_login_account(
        &self,
        identifier: &LoginIdentifier,
    ) -> Result<Option<Account>, ServiceError> {
        // Malformed identifiers cannot match anything; treat them as unknown.
        match identifier {
            LoginIdentifier::Email(raw) => match Email::parse(raw) {
                Ok(email) => Ok(self.accounts.find_by_email(&email).await?),
                Err(_) => Ok(None),
            },
            LoginIdentifier::StudentNumber(raw) => match raw.trim().parse::<StudentNumber>() {
                Ok(number) => Ok(self.accounts.find_by_student_number(&number).await?),
                Err(_) => Ok(None),
            },
        }
    }

    async fn record_failed_login(
        &self,
        subject: String,
        reason: &str,
        network: &NetworkMetadata,
        now: DateTime<Utc>,
    ) {
        tracing::info!(%subject, reason, "login failed");
        audit::record(
            &*self.audit,
            AuditEvent::new(subject, AuditAction::LoginFailed, format!("login failed: {reason}"), now)
                .with_network(Some(network.clone())),
        )
        .await;
    }

    async fn hash_password(&self, password: String) -> Result<PasswordHash, ServiceError> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| ServiceError::Internal(format!("password hashing task failed: {e}")))?
            .map_err(ServiceError::from)
    }

    async fn verify_password(&self, password: String, hash: PasswordHash) -> Result<bool, ServiceError> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| ServiceError::Internal(format!("password verification task failed: {e}")))
    }
}

/// SMTP when mail credentials are configured, otherwise log-only. A broken
/// SMTP configuration degrades to log-only instead of refusing to start.
fn select_notifier(config: &Config) -> Arc<dyn RegistrationNotifier> {
    let notifier: Arc<dyn RegistrationNotifier> = match config.smtp_settings() {
        None => Arc::new(LogNotifier),
        Some(settings) => match SmtpNotifier::new(settings) {
            Ok(smtp) => Arc::new(smtp),
            Err(e) => {
                tracing::warn!(error = %e, "smtp notifier unavailable; registration emails disabled");
                Arc::new(LogNotifier)
            }
        },
    };
    tracing::info!(channel = notifier.channel(), "registration notifier ready");
    notifier
}

#[cfg(test)]
mod tests {
    use portal_infra::NotifyError;

    use super::*;

    fn services() -> AppServices {
        let config = Config {
            jwt_secret: "test-secret".to_string(),
            ..Config::default()
        };
        AppServices::in_memory(&config)
    }

    fn registration(email: &str) -> Registration {
        Registration {
            email: email.to_string(),
            password: "secret1".to_string(),
            confirm_password: None,
            profile: Profile {
                full_name: "Maria Santos".to_string(),
                course: "BSCS".to_string(),
                ..Default::default()
            },
        }
    }

    fn net() -> NetworkMetadata {
        NetworkMetadata {
            ip: Some("10.0.0.7".to_string()),
            user_agent: Some("tests".to_string()),
        }
    }

    #[tokio::test]
    async fn register_assigns_sequential_numbers_in_current_year() {
        let svc = services();
        let first = svc.register(registration("a@hau.edu.ph"), net()).await.unwrap();
        let second = svc.register(registration("b@hau.edu.ph"), net()).await.unwrap();

        let year = Partition::current(Utc::now()).unwrap();
        assert_eq!(first.account.student_number.as_str(), format!("{}00001", year));
        assert_eq!(second.account.student_number.as_str(), format!("{}00002", year));
        assert!(!first.email_sent);
        assert!(!first.token.is_empty());
    }

    #[tokio::test]
    async fn register_validates_input() {
        let svc = services();

        let mut missing = registration("a@hau.edu.ph");
        missing.profile.full_name = "  ".into();
        assert!(matches!(svc.register(missing, net()).await, Err(ServiceError::Validation(_))));

        let bad_email = registration("not-an-email");
        assert!(matches!(svc.register(bad_email, net()).await, Err(ServiceError::Validation(_))));

        let mut short = registration("a@hau.edu.ph");
        short.password = "12345".into();
        assert!(matches!(svc.register(short, net()).await, Err(ServiceError::Validation(_))));

        let mut mismatch = registration("a@hau.edu.ph");
        mismatch.confirm_password = Some("other".into());
        assert!(matches!(svc.register(mismatch, net()).await, Err(ServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected_case_insensitively() {
        let svc = services();
        svc.register(registration("dup@hau.edu.ph"), net()).await.unwrap();
        let err = svc.register(registration("DUP@hau.edu.ph"), net()).await.unwrap_err();
        assert!(matches!(err, ServiceError::EmailTaken));
    }

    #[tokio::test]
    async fn login_by_email_or_number_and_failures_are_audited() {
        let svc = services();
        let reg = svc.register(registration("login@hau.edu.ph"), net()).await.unwrap();
        let number = reg.account.student_number.clone();

        svc.login(LoginIdentifier::Email("Login@hau.edu.ph".into()), "secret1".into(), net())
            .await
            .unwrap();
        svc.login(LoginIdentifier::StudentNumber(number.to_string()), "secret1".into(), net())
            .await
            .unwrap();

        let wrong = svc
            .login(LoginIdentifier::StudentNumber(number.to_string()), "nope123".into(), net())
            .await;
        assert!(matches!(wrong, Err(ServiceError::InvalidCredentials)));

        let unknown = svc
            .login(LoginIdentifier::Email("ghost@hau.edu.ph".into()), "secret1".into(), net())
            .await;
        assert!(matches!(unknown, Err(ServiceError::InvalidCredentials)));

        let logs = svc.logs(&number, number.as_str()).await.unwrap();
        let actions: Vec<_> = logs.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::LoginFailed,
                AuditAction::LoginSuccess,
                AuditAction::LoginSuccess,
                AuditAction::Registration,
            ]
        );
        assert_eq!(logs[0].network.as_ref().and_then(|n| n.ip.as_deref()), Some("10.0.0.7"));
    }

    #[tokio::test]
    async fn logs_are_private_to_their_subject() {
        let svc = services();
        let a = svc.register(registration("a@hau.edu.ph"), net()).await.unwrap();
        let b = svc.register(registration("b@hau.edu.ph"), net()).await.unwrap();

        let err = svc
            .logs(&a.account.student_number, b.account.student_number.as_str())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden));
    }

    #[tokio::test]
    async fn profile_update_changes_only_named_fields() {
        let svc = services();
        let reg = svc.register(registration("p@hau.edu.ph"), net()).await.unwrap();

        let update = ProfileUpdate {
            mobile: Some(" 09171234567 ".into()),
            ..Default::default()
        };
        let updated = svc.update_profile(&reg.account, update, net()).await.unwrap();
        assert_eq!(updated.profile.mobile, "09171234567");
        assert_eq!(updated.profile.course, "BSCS");
        assert_eq!(updated.email, reg.account.email);

        let empty = svc.update_profile(&updated, ProfileUpdate::default(), net()).await;
        assert!(matches!(empty, Err(ServiceError::Validation(_))));

        let logs = svc
            .logs(&updated.student_number, updated.student_number.as_str())
            .await
            .unwrap();
        assert_eq!(logs[0].action, AuditAction::ProfileUpdate);
        assert_eq!(logs[0].detail, "updated fields: mobile");
    }

    #[tokio::test]
    async fn updates_from_the_same_snapshot_do_not_overwrite_each_other() {
        let svc = services();
        let snapshot = svc.register(registration("race@hau.edu.ph"), net()).await.unwrap().account;

        let mobile = ProfileUpdate {
            mobile: Some("0917".into()),
            ..Default::default()
        };
        let address = ProfileUpdate {
            address: Some("Angeles".into()),
            ..Default::default()
        };
        svc.update_profile(&snapshot, mobile, net()).await.unwrap();
        let last = svc.update_profile(&snapshot, address, net()).await.unwrap();

        assert_eq!(last.profile.mobile, "0917");
        assert_eq!(last.profile.address, "Angeles");

        let stored = svc.student(snapshot.student_number.as_str()).await.unwrap();
        assert_eq!(stored.profile, last.profile);
    }

    #[tokio::test]
    async fn birth_date_can_be_cleared() {
        let svc = services();
        let mut input = registration("bd@hau.edu.ph");
        input.profile.birth_date = chrono::NaiveDate::from_ymd_opt(2004, 3, 9);
        let reg = svc.register(input, net()).await.unwrap();
        assert!(reg.account.profile.birth_date.is_some());

        let clear = ProfileUpdate {
            birth_date: Some(None),
            ..Default::default()
        };
        let updated = svc.update_profile(&reg.account, clear, net()).await.unwrap();
        assert_eq!(updated.profile.birth_date, None);
    }

    struct FailingNotifier;

    #[async_trait::async_trait]
    impl RegistrationNotifier for FailingNotifier {
        async fn notify_registered(&self, _: &Account) -> Result<bool, NotifyError> {
            Err(NotifyError::Delivery("smtp down".into()))
        }

        fn channel(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn notification_failure_does_not_fail_registration() {
        let svc = services().with_notifier(Arc::new(FailingNotifier));
        let reg = svc.register(registration("n@hau.edu.ph"), net()).await.unwrap();
        assert!(!reg.email_sent);
    }

    #[test]
    fn notifier_follows_mail_configuration() {
        assert_eq!(services().notifier.channel(), "log");

        let smtp = Config {
            email_user: Some("mailer".into()),
            email_password: Some("pw".into()),
            ..Config::default()
        };
        assert_eq!(AppServices::in_memory(&smtp).notifier.channel(), "smtp");

        let user_only = Config {
            email_user: Some("mailer".into()),
            ..Config::default()
        };
        assert_eq!(AppServices::in_memory(&user_only).notifier.channel(), "log");

        let bad_sender = Config {
            email_from: "not a mailbox".into(),
            ..smtp
        };
        assert_eq!(AppServices::in_memory(&bad_sender).notifier.channel(), "log");
    }
}
