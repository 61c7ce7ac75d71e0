//! Integration tests for concurrent registration.
//!
//! Tests: many concurrent allocate + insert calls → one shared store
//!
//! Verifies:
//! - No two registrations ever receive the same student number
//! - Numbers stay fixed-width and contiguous when no insert fails for other reasons
//! - Email uniqueness holds under the same contention

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use portal_core::{
        Account, AccountDraft, Email, IdentifierLayout, Partition, PasswordHash, Profile,
        ProfileUpdate, StudentNumber,
    };

    use crate::allocator::{AllocationError, SequenceAllocator};
    use crate::retry::RetryPolicy;
    use crate::store::{AccountStore, InMemoryAccountStore, StoreError};

    /// Yields to the scheduler between the read and the write so concurrent
    /// allocations interleave and actually race for the same candidate.
    struct InterleavingStore {
        inner: InMemoryAccountStore,
    }

    #[async_trait]
    impl AccountStore for InterleavingStore {
        async fn find_max_student_number(
            &self,
            partition: &Partition,
            identifier_len: usize,
        ) -> Result<Option<StudentNumber>, StoreError> {
            let max = self.inner.find_max_student_number(partition, identifier_len).await;
            tokio::task::yield_now().await;
            max
        }

        async fn insert_unique(&self, account: Account) -> Result<Account, StoreError> {
            tokio::task::yield_now().await;
            self.inner.insert_unique(account).await
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

    fn draft(i: usize) -> AccountDraft {
        AccountDraft {
            email: Email::parse(&format!("student{i}@hau.edu.ph")).unwrap(),
            password_hash: PasswordHash::new("hash"),
            profile: Profile {
                full_name: format!("Student {i}"),
                ..Default::default()
            },
        }
    }

    fn setup(max_attempts: u32) -> Arc<SequenceAllocator<Arc<InterleavingStore>>> {
        let store = Arc::new(InterleavingStore {
            inner: InMemoryAccountStore::new(),
        });
        // Each conflict means another registration succeeded, so N attempts
        // always suffice for N concurrent callers.
        Arc::new(
            SequenceAllocator::new(store)
                .with_retry_policy(RetryPolicy::fixed(max_attempts, Duration::ZERO))
                .with_deadline(Duration::from_secs(60)),
        )
    }

    async fn run_concurrently(
        allocator: Arc<SequenceAllocator<Arc<InterleavingStore>>>,
        partition: Partition,
        drafts: Vec<AccountDraft>,
    ) -> Vec<Result<Account, AllocationError>> {
        let handles: Vec<_> = drafts
            .into_iter()
            .map(|d| {
                let allocator = allocator.clone();
                tokio::spawn(async move { allocator.allocate(&partition, d).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for h in handles {
            results.push(h.await.expect("allocation task panicked"));
        }
        results
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registrations_receive_distinct_numbers() {
        const N: usize = 300;
        let allocator = setup(N as u32);
        let partition = Partition::from_year(2025).unwrap();

        let results = run_concurrently(allocator.clone(), partition, (0..N).map(draft).collect()).await;

        let numbers: Vec<StudentNumber> = results
            .into_iter()
            .map(|r| r.expect("allocation failed").student_number)
            .collect();
        let distinct: HashSet<_> = numbers.iter().cloned().collect();
        assert_eq!(distinct.len(), N);

        let layout = IdentifierLayout::default();
        let mut sequences: Vec<u64> = numbers
            .iter()
            .map(|n| {
                assert_eq!(n.as_str().len(), layout.identifier_len());
                layout.sequence_of(&partition, n).unwrap()
            })
            .collect();
        sequences.sort_unstable();
        assert_eq!(sequences, (1..=N as u64).collect::<Vec<_>>());
        assert_eq!(allocator.store().inner.len(), N);
    }

    #[tokio::test]
    async fn contention_beyond_budget_is_reported_not_duplicated() {
        const N: usize = 50;
        // Far too small a budget for this much contention on one thread.
        let allocator = setup(2);
        let partition = Partition::from_year(2025).unwrap();

        let results = run_concurrently(allocator.clone(), partition, (0..N).map(draft).collect()).await;

        let mut seen = HashSet::new();
        let mut exhausted = 0;
        for r in results {
            match r {
                Ok(account) => assert!(seen.insert(account.student_number)),
                Err(AllocationError::RetryExhausted { attempts, .. }) => {
                    assert_eq!(attempts, 2);
                    exhausted += 1;
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert!(exhausted > 0, "expected some callers to exhaust their budget");
        assert_eq!(seen.len() + exhausted, N);
        assert_eq!(allocator.store().inner.len(), seen.len());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn same_email_registers_once_under_contention() {
        const N: usize = 20;
        let allocator = setup(N as u32);
        let partition = Partition::from_year(2025).unwrap();

        let results = run_concurrently(allocator.clone(), partition, vec![draft(7); N]).await;

        let ok = results.iter().filter(|r| r.is_ok()).count();
        let taken = results
            .iter()
            .filter(|r| matches!(r, Err(AllocationError::EmailTaken)))
            .count();
        assert_eq!(ok, 1);
        assert_eq!(taken, N - 1);
    }
}
