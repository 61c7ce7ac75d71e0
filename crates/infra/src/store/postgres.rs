//! Postgres-backed account store.
//!
//! Uniqueness of student numbers and emails is enforced by table constraints,
//! which makes this store safe under horizontally scaled API processes.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation on `students_email_key`) | `23505` | `Conflict(Email)` |
//! | Database (any other unique violation) | `23505` | `Conflict(StudentNumber)` |
//! | Database (other) | Any other | `Unavailable` |
//! | PoolClosed / Io / Tls / Other | N/A | `Unavailable` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::instrument;

use portal_core::{Account, Email, Partition, PasswordHash, Profile, ProfileUpdate, StudentNumber};

use super::{AccountStore, StoreError, UniqueField};

const EMAIL_CONSTRAINT: &str = "students_email_key";

/// Postgres-backed account store.
///
/// The pool is opened by the caller at process start and handed in; `close()`
/// drains it at shutdown.
#[derive(Debug, Clone)]
pub struct PostgresAccountStore {
    pool: Arc<PgPool>,
}

impl PostgresAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the `students` table and its constraints if missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS students (
                id              BIGSERIAL PRIMARY KEY,
                student_number  TEXT NOT NULL,
                email           TEXT NOT NULL,
                password_hash   TEXT NOT NULL,
                full_name       TEXT NOT NULL,
                birth_date      DATE NULL,
                gender          TEXT NOT NULL DEFAULT '',
                religion        TEXT NOT NULL DEFAULT '',
                mobile          TEXT NOT NULL DEFAULT '',
                address         TEXT NOT NULL DEFAULT '',
                course          TEXT NOT NULL DEFAULT '',
                year_level      TEXT NOT NULL DEFAULT '',
                created_at      TIMESTAMPTZ NOT NULL,
                updated_at      TIMESTAMPTZ NOT NULL,
                CONSTRAINT students_student_number_key UNIQUE (student_number),
                CONSTRAINT students_email_key UNIQUE (email)
            )
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

const SELECT_COLUMNS: &str = r#"
    student_number, email, password_hash, full_name, birth_date, gender,
    religion, mobile, address, course, year_level, created_at, updated_at
"#;

#[async_trait]
impl AccountStore for PostgresAccountStore {
    #[instrument(skip(self, partition), fields(partition = %partition), err)]
    async fn find_max_student_number(
        &self,
        partition: &Partition,
        identifier_len: usize,
    ) -> Result<Option<StudentNumber>, StoreError> {
        // Fixed-width digits: "C" collation order equals numeric order.
        let row = sqlx::query(
            r#"
            SELECT student_number
            FROM students
            WHERE student_number LIKE $1 AND char_length(student_number) = $2
            ORDER BY student_number COLLATE "C" DESC
            LIMIT 1
            "#,
        )
        .bind(format!("{}%", partition.as_prefix()))
        .bind(identifier_len as i32)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_max_student_number", e))?;

        match row {
            Some(row) => {
                let raw: String = row
                    .try_get("student_number")
                    .map_err(|e| map_sqlx_error("find_max_student_number", e))?;
                raw.parse()
                    .map(Some)
                    .map_err(|e| StoreError::Unavailable(format!("corrupt student number '{raw}': {e}")))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, account), fields(student_number = %account.student_number), err)]
    async fn insert_unique(&self, account: Account) -> Result<Account, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO students (
                student_number, email, password_hash, full_name, birth_date, gender,
                religion, mobile, address, course, year_level, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(account.student_number.as_str())
        .bind(account.email.as_str())
        .bind(account.password_hash.expose())
        .bind(&account.profile.full_name)
        .bind(account.profile.birth_date)
        .bind(&account.profile.gender)
        .bind(&account.profile.religion)
        .bind(&account.profile.mobile)
        .bind(&account.profile.address)
        .bind(&account.profile.course)
        .bind(&account.profile.year_level)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_unique", e))?;

        Ok(account)
    }

    #[instrument(skip(self, email), err)]
    async fn find_by_email(&self, email: &Email) -> Result<Option<Account>, StoreError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM students WHERE email = $1");
        let row = sqlx::query(&sql)
            .bind(email.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_email", e))?;
        row.as_ref().map(account_from_row).transpose()
    }

    #[instrument(skip(self), fields(student_number = %number), err)]
    async fn find_by_student_number(
        &self,
        number: &StudentNumber,
    ) -> Result<Option<Account>, StoreError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM students WHERE student_number = $1");
        let row = sqlx::query(&sql)
            .bind(number.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_student_number", e))?;
        row.as_ref().map(account_from_row).transpose()
    }

    /// Single-statement merge: absent fields fall back to the stored column,
    /// so concurrent updates of different fields never overwrite each other.
    #[instrument(skip(self, update), fields(student_number = %number), err)]
    async fn update_profile(
        &self,
        number: &StudentNumber,
        update: &ProfileUpdate,
        now: DateTime<Utc>,
    ) -> Result<Account, StoreError> {
        let sql = format!(
            r#"
            UPDATE students
            SET full_name  = COALESCE($2, full_name),
                birth_date = CASE WHEN $3 THEN $4 ELSE birth_date END,
                gender     = COALESCE($5, gender),
                religion   = COALESCE($6, religion),
                mobile     = COALESCE($7, mobile),
                address    = COALESCE($8, address),
                course     = COALESCE($9, course),
                year_level = COALESCE($10, year_level),
                updated_at = $11
            WHERE student_number = $1
            RETURNING {SELECT_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(number.as_str())
            .bind(update.full_name.as_deref())
            .bind(update.birth_date.is_some())
            .bind(update.birth_date.flatten())
            .bind(update.gender.as_deref())
            .bind(update.religion.as_deref())
            .bind(update.mobile.as_deref())
            .bind(update.address.as_deref())
            .bind(update.course.as_deref())
            .bind(update.year_level.as_deref())
            .bind(now)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_profile", e))?
            .ok_or(StoreError::NotFound)?;
        account_from_row(&row)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn account_from_row(row: &PgRow) -> Result<Account, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Unavailable(format!("failed to decode student row: {e}"));

    let number: String = row.try_get("student_number").map_err(decode)?;
    let email: String = row.try_get("email").map_err(decode)?;
    let birth_date: Option<NaiveDate> = row.try_get("birth_date").map_err(decode)?;

    Ok(Account {
        student_number: number
            .parse()
            .map_err(|e| StoreError::Unavailable(format!("corrupt student number '{number}': {e}")))?,
        email: Email::parse(&email)
            .map_err(|e| StoreError::Unavailable(format!("corrupt email for {number}: {e}")))?,
        password_hash: PasswordHash::new(row.try_get::<String, _>("password_hash").map_err(decode)?),
        profile: Profile {
            full_name: row.try_get("full_name").map_err(decode)?,
            birth_date,
            gender: row.try_get("gender").map_err(decode)?,
            religion: row.try_get("religion").map_err(decode)?,
            mobile: row.try_get("mobile").map_err(decode)?,
            address: row.try_get("address").map_err(decode)?,
            course: row.try_get("course").map_err(decode)?,
            year_level: row.try_get("year_level").map_err(decode)?,
        },
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

/// Map SQLx errors onto the store taxonomy.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            if db_err.code().as_deref() == Some("23505") {
                return if db_err.constraint() == Some(EMAIL_CONSTRAINT) {
                    StoreError::Conflict(UniqueField::Email)
                } else {
                    StoreError::Conflict(UniqueField::StudentNumber)
                };
            }
            StoreError::Unavailable(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {operation}"))
        }
        other => StoreError::Unavailable(format!("sqlx error in {operation}: {other}")),
    }
}
