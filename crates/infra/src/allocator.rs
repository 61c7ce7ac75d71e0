//! Sequential student-number allocation.
//!
//! Student numbers are `<partition><sequence>` with a fixed-width, zero-padded
//! sequence that restarts at 1 in every partition (calendar year).
//!
//! ## Concurrency Model
//!
//! Computing "highest existing number + 1" is a read-then-write and is **not**
//! atomic: two concurrent registrations can compute the same candidate. The
//! allocator therefore never trusts the computed number on its own:
//!
//! ```text
//! loop (bounded by RetryPolicy::max_attempts and an overall deadline)
//!   ↓
//! 1. Read max identifier with the partition prefix (advisory)
//!   ↓
//! 2. Compose candidate = max + 1 (or 1), fixed width
//!   ↓
//! 3. insert_unique(candidate): the store constraint is authoritative
//!   ↓
//! 4. Conflict on student_number → back off, go to 1
//! ```
//!
//! ## Failure Semantics
//!
//! - Store read/write failures (other than a student-number conflict) are
//!   propagated as [`AllocationError::StoreUnavailable`] without retrying.
//! - An email conflict is not contention; it surfaces as
//!   [`AllocationError::EmailTaken`] immediately.
//! - Running out of attempts yields [`AllocationError::RetryExhausted`].
//! - A sequence that no longer fits the width is
//!   [`AllocationError::SequenceOverflow`]; it is never truncated.
//! - Exceeding the deadline yields [`AllocationError::StoreUnavailable`].

use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use portal_core::{Account, AccountDraft, IdentifierLayout, Partition, StudentNumber};

use crate::retry::RetryPolicy;
use crate::store::{AccountStore, StoreError, UniqueField};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocationError {
    /// The partition has no sequence numbers left at the configured width.
    #[error("sequence space of partition {partition} exhausted at {width} digits")]
    SequenceOverflow { partition: Partition, width: u32 },

    /// Every attempt collided with a concurrently inserted number.
    #[error("allocation in partition {partition} gave up after {attempts} conflicting attempts")]
    RetryExhausted { partition: Partition, attempts: u32 },

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("email address is already registered")]
    EmailTaken,
}

/// Allocates student numbers against an [`AccountStore`].
#[derive(Debug, Clone)]
pub struct SequenceAllocator<S> {
    store: S,
    layout: IdentifierLayout,
    retry: RetryPolicy,
    deadline: Duration,
}

impl<S> SequenceAllocator<S>
where
    S: AccountStore,
{
    pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);

    pub fn new(store: S) -> Self {
        Self {
            store,
            layout: IdentifierLayout::default(),
            retry: RetryPolicy::default(),
            deadline: Self::DEFAULT_DEADLINE,
        }
    }

    pub fn with_layout(mut self, layout: IdentifierLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Upper bound for a whole [`allocate`](Self::allocate) call, retries included.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn layout(&self) -> IdentifierLayout {
        self.layout
    }

    /// Next candidate number for `partition`.
    ///
    /// Advisory only: the result is unique only once an insert has accepted it.
    #[instrument(skip(self, partition), fields(partition = %partition))]
    pub async fn next_identifier(&self, partition: &Partition) -> Result<StudentNumber, AllocationError> {
        let max = self
            .store
            .find_max_student_number(partition, self.layout.identifier_len())
            .await
            .map_err(|e| AllocationError::StoreUnavailable(e.to_string()))?;

        let next = match max {
            None => 1,
            Some(id) => {
                let current = self.layout.sequence_of(partition, &id).map_err(|e| {
                    AllocationError::StoreUnavailable(format!("malformed stored identifier: {e}"))
                })?;
                current + 1
            }
        };

        self.layout
            .compose(partition, next)
            .map_err(|_| AllocationError::SequenceOverflow {
                partition: *partition,
                width: self.layout.width(),
            })
    }

    /// Allocate a number for `draft` and persist the account.
    ///
    /// The returned account is the one the store accepted; its number is
    /// unique store-wide.
    #[instrument(skip(self, partition, draft), fields(partition = %partition))]
    pub async fn allocate(
        &self,
        partition: &Partition,
        draft: AccountDraft,
    ) -> Result<Account, AllocationError> {
        match tokio::time::timeout(self.deadline, self.allocate_with_retry(partition, draft)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(deadline_ms = self.deadline.as_millis() as u64, "allocation deadline elapsed");
                Err(AllocationError::StoreUnavailable(format!(
                    "allocation deadline of {}ms elapsed",
                    self.deadline.as_millis()
                )))
            }
        }
    }

    async fn allocate_with_retry(
        &self,
        partition: &Partition,
        draft: AccountDraft,
    ) -> Result<Account, AllocationError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;

            let candidate = self.next_identifier(partition).await?;
            let account = draft.clone().into_account(candidate.clone(), Utc::now());

            match self.store.insert_unique(account).await {
                Ok(account) => {
                    debug!(student_number = %account.student_number, attempt, "student number allocated");
                    return Ok(account);
                }
                Err(StoreError::Conflict(UniqueField::StudentNumber)) => {
                    if !self.retry.should_retry(attempt) {
                        warn!(attempts = attempt, "student number allocation exhausted retry budget");
                        return Err(AllocationError::RetryExhausted {
                            partition: *partition,
                            attempts: attempt,
                        });
                    }
                    let delay = self.retry.delay_for_attempt(attempt);
                    debug!(%candidate, attempt, delay_ms = delay.as_millis() as u64, "student number taken, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(StoreError::Conflict(UniqueField::Email)) => return Err(AllocationError::EmailTaken),
                Err(e) => return Err(AllocationError::StoreUnavailable(e.to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use chrono::DateTime;
    use portal_core::{Email, PasswordHash, Profile, ProfileUpdate};

    use super::*;
    use crate::store::InMemoryAccountStore;

    fn draft(email: &str) -> AccountDraft {
        AccountDraft {
            email: Email::parse(email).unwrap(),
            password_hash: PasswordHash::new("hash"),
            profile: Profile {
                full_name: "Ana Reyes".into(),
                course: "BSIT".into(),
                ..Default::default()
            },
        }
    }

    fn partition(year: i32) -> Partition {
        Partition::from_year(year).unwrap()
    }

    fn no_wait(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::fixed(max_attempts, Duration::ZERO)
    }

    #[derive(Debug, Clone, Copy)]
    enum Behavior {
        AlwaysConflict,
        ConflictTimes(u32),
        EmailConflict,
        ReadFails,
        InsertFails,
        HangOnRead,
    }

    /// Store with scripted failures that counts calls.
    struct ScriptedStore {
        behavior: Behavior,
        reads: AtomicU32,
        inserts: AtomicU32,
        inner: InMemoryAccountStore,
    }

    impl ScriptedStore {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                reads: AtomicU32::new(0),
                inserts: AtomicU32::new(0),
                inner: InMemoryAccountStore::new(),
            })
        }
    }

    #[async_trait]
    impl AccountStore for ScriptedStore {
        async fn find_max_student_number(
            &self,
            partition: &Partition,
            identifier_len: usize,
        ) -> Result<Option<StudentNumber>, StoreError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::ReadFails => Err(StoreError::Unavailable("connection reset".into())),
                Behavior::HangOnRead => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(None)
                }
                _ => self.inner.find_max_student_number(partition, identifier_len).await,
            }
        }

        async fn insert_unique(&self, account: Account) -> Result<Account, StoreError> {
            let n = self.inserts.fetch_add(1, Ordering::SeqCst) + 1;
            match self.behavior {
                Behavior::AlwaysConflict => Err(StoreError::Conflict(UniqueField::StudentNumber)),
                Behavior::ConflictTimes(k) if n <= k => {
                    Err(StoreError::Conflict(UniqueField::StudentNumber))
                }
                Behavior::EmailConflict => Err(StoreError::Conflict(UniqueField::Email)),
                Behavior::InsertFails => Err(StoreError::Unavailable("disk full".into())),
                _ => self.inner.insert_unique(account).await,
            }
        }

        async fn find_by_email(&self, email: &Email) -> Result<Option<Account>, StoreError> {
            self.inner.find_by_email(email).await
        }

        async fn find_by_student_number(
            &self,
            number: &StudentNumber,
        ) -> Result<Option<Account>, StoreError> {
            self.inner.find_by_student_number(number).await
        }

        async fn update_profile(
            &self,
            number: &StudentNumber,
            update: &ProfileUpdate,
            now: DateTime<Utc>,
        ) -> Result<Account, StoreError> {
            self.inner.update_profile(number, update, now).await
        }
    }

    #[tokio::test]
    async fn first_number_in_empty_partition_is_one() {
        let allocator = SequenceAllocator::new(InMemoryAccountStore::new());
        let id = allocator.next_identifier(&partition(2025)).await.unwrap();
        assert_eq!(id.as_str(), "202500001");
    }

    #[tokio::test]
    async fn sequential_allocations_strictly_increase() {
        let allocator = SequenceAllocator::new(InMemoryAccountStore::new());
        let layout = allocator.layout();
        let p = partition(2025);

        let mut previous = 0;
        for i in 0..20 {
            let account = allocator
                .allocate(&p, draft(&format!("s{i}@hau.edu.ph")))
                .await
                .unwrap();
            assert_eq!(account.student_number.as_str().len(), layout.identifier_len());
            let seq = layout.sequence_of(&p, &account.student_number).unwrap();
            assert!(seq > previous, "{seq} should exceed {previous}");
            previous = seq;
        }
        assert_eq!(previous, 20);
    }

    #[tokio::test]
    async fn partitions_are_independent() {
        let allocator = SequenceAllocator::new(InMemoryAccountStore::new());
        for i in 0..3 {
            allocator
                .allocate(&partition(2025), draft(&format!("a{i}@x.io")))
                .await
                .unwrap();
        }

        let next_year = allocator
            .allocate(&partition(2026), draft("new@x.io"))
            .await
            .unwrap();
        assert_eq!(next_year.student_number.as_str(), "202600001");

        let this_year = allocator.next_identifier(&partition(2025)).await.unwrap();
        assert_eq!(this_year.as_str(), "202500004");
    }

    #[tokio::test]
    async fn continues_after_existing_maximum() {
        let store = InMemoryAccountStore::new();
        store
            .insert_unique(draft("old@x.io").into_account("202500041".parse().unwrap(), Utc::now()))
            .await
            .unwrap();

        let allocator = SequenceAllocator::new(store);
        let account = allocator.allocate(&partition(2025), draft("next@x.io")).await.unwrap();
        assert_eq!(account.student_number.as_str(), "202500042");
    }

    #[tokio::test]
    async fn overflow_is_surfaced() {
        let layout = IdentifierLayout::new(1).unwrap();
        let allocator = SequenceAllocator::new(InMemoryAccountStore::new()).with_layout(layout);
        let p = partition(2025);

        for i in 0..9 {
            allocator.allocate(&p, draft(&format!("o{i}@x.io"))).await.unwrap();
        }
        assert_eq!(
            allocator.allocate(&p, draft("tenth@x.io")).await,
            Err(AllocationError::SequenceOverflow { partition: p, width: 1 })
        );
    }

    #[tokio::test]
    async fn persistent_conflicts_exhaust_after_exact_budget() {
        let store = ScriptedStore::new(Behavior::AlwaysConflict);
        let allocator = SequenceAllocator::new(store.clone()).with_retry_policy(no_wait(5));

        let err = allocator.allocate(&partition(2025), draft("a@x.io")).await.unwrap_err();
        assert_eq!(
            err,
            AllocationError::RetryExhausted { partition: partition(2025), attempts: 5 }
        );
        assert_eq!(store.inserts.load(Ordering::SeqCst), 5);
        assert_eq!(store.reads.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn transient_conflicts_are_retried() {
        let store = ScriptedStore::new(Behavior::ConflictTimes(2));
        let allocator = SequenceAllocator::new(store.clone()).with_retry_policy(no_wait(5));

        let account = allocator.allocate(&partition(2025), draft("a@x.io")).await.unwrap();
        assert_eq!(account.student_number.as_str(), "202500001");
        assert_eq!(store.inserts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn email_conflict_is_not_retried() {
        let store = ScriptedStore::new(Behavior::EmailConflict);
        let allocator = SequenceAllocator::new(store.clone()).with_retry_policy(no_wait(5));

        assert_eq!(
            allocator.allocate(&partition(2025), draft("a@x.io")).await,
            Err(AllocationError::EmailTaken)
        );
        assert_eq!(store.inserts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn store_failures_propagate_without_retry() {
        let store = ScriptedStore::new(Behavior::ReadFails);
        let allocator = SequenceAllocator::new(store.clone()).with_retry_policy(no_wait(5));
        assert!(matches!(
            allocator.allocate(&partition(2025), draft("a@x.io")).await,
            Err(AllocationError::StoreUnavailable(_))
        ));
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);
        assert_eq!(store.inserts.load(Ordering::SeqCst), 0);

        let store = ScriptedStore::new(Behavior::InsertFails);
        let allocator = SequenceAllocator::new(store.clone()).with_retry_policy(no_wait(5));
        assert!(matches!(
            allocator.allocate(&partition(2025), draft("a@x.io")).await,
            Err(AllocationError::StoreUnavailable(_))
        ));
        assert_eq!(store.inserts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_bounds_the_whole_call() {
        let store = ScriptedStore::new(Behavior::HangOnRead);
        let allocator = SequenceAllocator::new(store)
            .with_deadline(Duration::from_millis(50));

        assert!(matches!(
            allocator.allocate(&partition(2025), draft("a@x.io")).await,
            Err(AllocationError::StoreUnavailable(msg)) if msg.contains("deadline")
        ));
    }
}
