use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use portal_core::{Account, Email, Partition, ProfileUpdate, StudentNumber};

use super::{AccountStore, StoreError, UniqueField};

#[derive(Debug, Default)]
struct Accounts {
    by_number: BTreeMap<String, Account>,
    /// email -> student number
    by_email: HashMap<String, String>,
}

/// In-memory account store.
///
/// Intended for tests/dev. Both uniqueness checks and the write happen under
/// one write lock, so it enforces the same constraints a database would.
#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    inner: RwLock<Accounts>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|a| a.by_number.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> StoreError {
        StoreError::Unavailable("lock poisoned".to_string())
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn find_max_student_number(
        &self,
        partition: &Partition,
        identifier_len: usize,
    ) -> Result<Option<StudentNumber>, StoreError> {
        let prefix = partition.as_prefix();
        let accounts = self.inner.read().map_err(|_| Self::poisoned())?;

        let max = accounts
            .by_number
            .range::<str, _>((Bound::Included(prefix.as_str()), Bound::Unbounded))
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(&prefix))
            .filter(|k| k.len() == identifier_len)
            .last();

        match max {
            Some(k) => k
                .parse()
                .map(Some)
                .map_err(|e| StoreError::Unavailable(format!("corrupt student number '{k}': {e}"))),
            None => Ok(None),
        }
    }

    async fn insert_unique(&self, account: Account) -> Result<Account, StoreError> {
        let mut accounts = self.inner.write().map_err(|_| Self::poisoned())?;

        let number = account.student_number.as_str().to_string();
        if accounts.by_number.contains_key(&number) {
            return Err(StoreError::Conflict(UniqueField::StudentNumber));
        }
        let email = account.email.as_str().to_string();
        if accounts.by_email.contains_key(&email) {
            return Err(StoreError::Conflict(UniqueField::Email));
        }

        accounts.by_email.insert(email, number.clone());
        accounts.by_number.insert(number, account.clone());
        Ok(account)
    }

    async fn find_by_email(&self, email: &Email) -> Result<Option<Account>, StoreError> {
        let accounts = self.inner.read().map_err(|_| Self::poisoned())?;
        Ok(accounts
            .by_email
            .get(email.as_str())
            .and_then(|n| accounts.by_number.get(n))
            .cloned())
    }

    async fn find_by_student_number(
        &self,
        number: &StudentNumber,
    ) -> Result<Option<Account>, StoreError> {
        let accounts = self.inner.read().map_err(|_| Self::poisoned())?;
        Ok(accounts.by_number.get(number.as_str()).cloned())
    }

    async fn update_profile(
        &self,
        number: &StudentNumber,
        update: &ProfileUpdate,
        now: DateTime<Utc>,
    ) -> Result<Account, StoreError> {
        let mut accounts = self.inner.write().map_err(|_| Self::poisoned())?;
        let account = accounts
            .by_number
            .get_mut(number.as_str())
            .ok_or(StoreError::NotFound)?;
        update.merge_into(&mut account.profile);
        account.updated_at = now;
        Ok(account.clone())
    }
}
