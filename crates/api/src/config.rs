//! Process configuration loaded from environment variables.
//!
//! Every setting has a default so a bare `cargo run` starts an in-memory
//! development server. Malformed values are rejected rather than replaced.

use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use axum::http::HeaderValue;
use thiserror::Error;

use portal_core::IdentifierLayout;
use portal_infra::{RetryPolicy, SmtpSettings};
use portal_observability::LogFormat;

pub const DEV_JWT_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid value '{value}' for {key}: {reason}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

#[derive(Clone)]
pub struct Config {
    pub bind_addr: IpAddr,
    pub port: u16,
    pub jwt_secret: String,
    /// True when `JWT_SECRET` was absent and the dev default is in use.
    pub jwt_secret_is_default: bool,
    pub token_ttl: chrono::Duration,
    /// `None` selects the in-memory stores.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub layout: IdentifierLayout,
    pub allocation_max_attempts: u32,
    pub allocation_backoff: Duration,
    pub allocation_deadline: Duration,
    pub audit_retention_days: i64,
    pub log_format: LogFormat,
    /// `None` allows any origin.
    pub cors_allow_origin: Option<HeaderValue>,
    pub email_host: String,
    pub email_port: u16,
    pub email_user: Option<String>,
    pub email_password: Option<String>,
    pub email_from: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 5000,
            jwt_secret: DEV_JWT_SECRET.to_string(),
            jwt_secret_is_default: true,
            token_ttl: chrono::Duration::hours(portal_auth::Hs256Jwt::DEFAULT_TTL_HOURS),
            database_url: None,
            database_max_connections: 10,
            layout: IdentifierLayout::default(),
            allocation_max_attempts: 5,
            allocation_backoff: Duration::from_millis(10),
            allocation_deadline: Duration::from_millis(5000),
            audit_retention_days: 90,
            log_format: LogFormat::Json,
            cors_allow_origin: None,
            email_host: "smtp.gmail.com".to_string(),
            email_port: 587,
            email_user: None,
            email_password: None,
            email_from: "HAU Portal <noreply@hau.edu.ph>".to_string(),
        }
    }
}

impl core::fmt::Debug for Config {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Config")
            .field("bind_addr", &self.bind_addr)
            .field("port", &self.port)
            .field("jwt_secret", &"<redacted>")
            .field("jwt_secret_is_default", &self.jwt_secret_is_default)
            .field("token_ttl", &self.token_ttl)
            .field("database_url", &self.database_url.as_ref().map(|_| "<redacted>"))
            .field("database_max_connections", &self.database_max_connections)
            .field("layout", &self.layout)
            .field("allocation_max_attempts", &self.allocation_max_attempts)
            .field("allocation_backoff", &self.allocation_backoff)
            .field("allocation_deadline", &self.allocation_deadline)
            .field("audit_retention_days", &self.audit_retention_days)
            .field("log_format", &self.log_format)
            .field("cors_allow_origin", &self.cors_allow_origin)
            .field("email_host", &self.email_host)
            .field("email_port", &self.email_port)
            .field("email_user", &self.email_user)
            .field("email_password", &self.email_password.as_ref().map(|_| "<redacted>"))
            .field("email_from", &self.email_from)
            .finish()
    }
}

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let jwt_secret = get("JWT_SECRET");
        let jwt_secret_is_default = jwt_secret.is_none();

        let ttl_hours: i64 = parse_or(&get, "TOKEN_TTL_HOURS", portal_auth::Hs256Jwt::DEFAULT_TTL_HOURS)?;
        let token_ttl = chrono::Duration::try_hours(ttl_hours)
            .filter(|ttl| *ttl > chrono::Duration::zero())
            .ok_or_else(|| invalid("TOKEN_TTL_HOURS", ttl_hours, "must be a positive number of hours"))?;

        let width: u32 = parse_or(&get, "STUDENT_NUMBER_WIDTH", IdentifierLayout::DEFAULT_WIDTH)?;
        let layout = IdentifierLayout::new(width)
            .map_err(|e| invalid("STUDENT_NUMBER_WIDTH", width, e))?;

        let allocation_max_attempts: u32 =
            parse_or(&get, "ALLOCATION_MAX_ATTEMPTS", defaults.allocation_max_attempts)?;
        if allocation_max_attempts == 0 {
            return Err(invalid("ALLOCATION_MAX_ATTEMPTS", 0, "must be at least 1"));
        }

        let allocation_deadline_ms: u64 = parse_or(&get, "ALLOCATION_DEADLINE_MS", 5000)?;
        if allocation_deadline_ms == 0 {
            return Err(invalid("ALLOCATION_DEADLINE_MS", 0, "must be at least 1"));
        }

        let audit_retention_days: i64 =
            parse_or(&get, "AUDIT_RETENTION_DAYS", defaults.audit_retention_days)?;
        if !(1..=36_500).contains(&audit_retention_days) {
            return Err(invalid("AUDIT_RETENTION_DAYS", audit_retention_days, "must be between 1 and 36500"));
        }

        let cors_allow_origin = match get("CORS_ALLOW_ORIGIN") {
            None => None,
            Some(origin) if origin == "*" => None,
            Some(origin) => Some(
                HeaderValue::from_str(&origin)
                    .map_err(|e| invalid("CORS_ALLOW_ORIGIN", &origin, e))?,
            ),
        };

        Ok(Self {
            bind_addr: parse_or(&get, "BIND_ADDR", defaults.bind_addr)?,
            port: parse_or(&get, "PORT", defaults.port)?,
            jwt_secret: jwt_secret.unwrap_or(defaults.jwt_secret),
            jwt_secret_is_default,
            token_ttl,
            database_url: get("DATABASE_URL"),
            database_max_connections: parse_or(
                &get,
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            layout,
            allocation_max_attempts,
            allocation_backoff: Duration::from_millis(parse_or(&get, "ALLOCATION_BACKOFF_MS", 10u64)?),
            allocation_deadline: Duration::from_millis(allocation_deadline_ms),
            audit_retention_days,
            log_format: parse_or(&get, "LOG_FORMAT", defaults.log_format)?,
            cors_allow_origin,
            email_host: get("EMAIL_HOST").unwrap_or(defaults.email_host),
            email_port: parse_or(&get, "EMAIL_PORT", defaults.email_port)?,
            email_user: get("EMAIL_USER"),
            email_password: get("EMAIL_PASSWORD"),
            email_from: get("EMAIL_FROM").unwrap_or(defaults.email_from),
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    /// Linear backoff from `ALLOCATION_BACKOFF_MS`, capped at 25 steps.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::linear(
            self.allocation_max_attempts,
            self.allocation_backoff,
            self.allocation_backoff.saturating_mul(25),
        )
    }

    /// SMTP delivery is enabled only when both credentials are present.
    pub fn smtp_settings(&self) -> Option<SmtpSettings> {
        let (Some(username), Some(password)) = (&self.email_user, &self.email_password) else {
            return None;
        };
        Some(SmtpSettings {
            host: self.email_host.clone(),
            port: self.email_port,
            username: username.clone(),
            password: password.clone(),
            from: self.email_from.clone(),
        })
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e| invalid(key, &raw, e)),
    }
}

fn invalid(key: &'static str, value: impl Display, reason: impl Display) -> ConfigError {
    ConfigError {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
