//! Optimistic-concurrency primitives.
//!
//! A store exposes a plain read and a conditional write that only lands when
//! the caller's expected version still matches. [`update_with_retry`] and
//! [`upsert_with_retry`] build read-transform-write loops on top, retrying
//! stale attempts under a [`BackoffPolicy`]. No lock or transaction is held
//! between the read and the write.

use std::fmt;

use async_trait::async_trait;
use study_core::BackoffPolicy;
use study_core::model::Versioned;
use tracing::{debug, error, warn};

use crate::repository::StorageError;

/// Result of a single conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write landed and the row now carries `version`.
    Applied { version: i64 },
    /// Another writer bumped the version first; nothing was written.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
}

/// What a transform wants done with the payload it was shown.
#[derive(Debug, Clone, PartialEq)]
pub enum Update<P> {
    Write(P),
    Skip,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome<P> {
    /// A new version was written.
    Applied(Versioned<P>),
    /// The transform declined to write; this is the state it saw.
    Unchanged(Versioned<P>),
}

impl<P> RetryOutcome<P> {
    #[must_use]
    pub fn record(&self) -> &Versioned<P> {
        match self {
            Self::Applied(r) | Self::Unchanged(r) => r,
        }
    }

    #[must_use]
    pub fn into_record(self) -> Versioned<P> {
        match self {
            Self::Applied(r) | Self::Unchanged(r) => r,
        }
    }

    #[must_use]
    pub fn was_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Keyed records guarded by a version column.
#[async_trait]
pub trait VersionedStore<K, P>: Send + Sync
where
    K: Send + Sync,
    P: Send + Sync,
{
    /// Current payload and version, or `None` when no row exists.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read or the row cannot be decoded.
    async fn read(&self, key: &K) -> Result<Option<Versioned<P>>, StorageError>;

    /// Replace the payload only if the stored version equals `expected_version`,
    /// bumping it by exactly one in the same operation.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure. A version mismatch is not an
    /// error but `WriteOutcome::Stale`.
    async fn try_write(
        &self,
        key: &K,
        payload: &P,
        expected_version: i64,
    ) -> Result<WriteOutcome, StorageError>;

    /// Create the row at the initial version unless one already exists.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure. A concurrent creation is
    /// reported as `InsertOutcome::AlreadyExists`.
    async fn insert_if_absent(&self, key: &K, payload: &P) -> Result<InsertOutcome, StorageError>;
}

/// Read, transform and conditionally write an existing record, retrying on
/// version conflicts.
///
/// `transform` may run once per attempt and must not have side effects.
///
/// # Errors
///
/// - `StorageError::NotFound` if the record does not exist.
/// - `StorageError::ConcurrencyExhausted` after `policy.max_attempts()` stale writes.
/// - Any backend error from `read` or `try_write`.
pub async fn update_with_retry<K, P, S, F>(
    store: &S,
    key: &K,
    policy: &BackoffPolicy,
    transform: F,
) -> Result<RetryOutcome<P>, StorageError>
where
    S: VersionedStore<K, P> + ?Sized,
    K: fmt::Display + Send + Sync,
    P: Send + Sync,
    F: Fn(&P) -> Update<P> + Send + Sync,
{
    retry_loop(store, key, policy, |current: Option<&P>| {
        current.map(&transform)
    })
    .await
}

/// Like [`update_with_retry`], but a missing record is created from
/// `transform(None)` with a conditional insert.
///
/// Losing an insert race counts as a stale attempt; the next attempt
/// transforms the row the winner created.
///
/// # Errors
///
/// Same as [`update_with_retry`], except that a missing record is not an error.
pub async fn upsert_with_retry<K, P, S, F>(
    store: &S,
    key: &K,
    policy: &BackoffPolicy,
    transform: F,
) -> Result<RetryOutcome<P>, StorageError>
where
    S: VersionedStore<K, P> + ?Sized,
    K: fmt::Display + Send + Sync,
    P: Send + Sync,
    F: Fn(Option<&P>) -> Update<P> + Send + Sync,
{
    retry_loop(store, key, policy, |current: Option<&P>| Some(transform(current))).await
}

/// Make sure a record exists, tolerating a concurrent creation.
///
/// # Errors
///
/// Returns `StorageError` on backend failure.
pub async fn ensure_exists<K, P, S>(
    store: &S,
    key: &K,
    initial: &P,
) -> Result<InsertOutcome, StorageError>
where
    S: VersionedStore<K, P> + ?Sized,
    K: fmt::Display + Send + Sync,
    P: Send + Sync,
{
    if store.read(key).await?.is_some() {
        return Ok(InsertOutcome::AlreadyExists);
    }
    let outcome = store.insert_if_absent(key, initial).await?;
    if outcome == InsertOutcome::Inserted {
        debug!(%key, "record created");
    }
    Ok(outcome)
}

// `plan` returns `None` when the row is missing and may not be created.
async fn retry_loop<K, P, S, F>(
    store: &S,
    key: &K,
    policy: &BackoffPolicy,
    plan: F,
) -> Result<RetryOutcome<P>, StorageError>
where
    S: VersionedStore<K, P> + ?Sized,
    K: fmt::Display + Send + Sync,
    P: Send + Sync,
    F: Fn(Option<&P>) -> Option<Update<P>> + Send + Sync,
{
    let max_attempts = policy.max_attempts();
    for attempt in 1..=max_attempts {
        let current = store.read(key).await?;
        let applied = match current {
            Some(current) => {
                let next = match plan(Some(&current.payload)) {
                    Some(Update::Write(next)) => next,
                    Some(Update::Skip) | None => return Ok(RetryOutcome::Unchanged(current)),
                };
                match store.try_write(key, &next, current.version).await? {
                    WriteOutcome::Applied { version } => Some(Versioned::new(next, version)),
                    WriteOutcome::Stale => {
                        warn!(%key, attempt, expected = current.version, "stale write, retrying");
                        None
                    }
                }
            }
            None => {
                let fresh = match plan(None) {
                    Some(Update::Write(fresh)) => fresh,
                    Some(Update::Skip) | None => return Err(StorageError::NotFound),
                };
                match store.insert_if_absent(key, &fresh).await? {
                    InsertOutcome::Inserted => Some(Versioned::initial(fresh)),
                    InsertOutcome::AlreadyExists => {
                        warn!(%key, attempt, "lost insert race, retrying");
                        None
                    }
                }
            }
        };

        if let Some(record) = applied {
            debug!(%key, attempt, version = record.version, "write applied");
            return Ok(RetryOutcome::Applied(record));
        }

        if attempt < max_attempts {
            let delay = policy.delay_after(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    error!(%key, attempts = max_attempts, "optimistic write retries exhausted");
    Err(StorageError::ConcurrencyExhausted {
        attempts: max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;
    use study_core::model::{Activity, ActivityKey, PathId, UserId};
    use study_core::time::fixed_now;

    fn key() -> ActivityKey {
        ActivityKey::new(UserId::new(1), PathId::new(1), "Ownership")
    }

    #[tokio::test]
    async fn update_of_missing_record_is_not_found() {
        let repo = InMemoryRepository::new();
        let err = update_with_retry(&repo, &key(), &BackoffPolicy::immediate(3), |a: &Activity| {
            Update::Write(a.with_added_minutes(1.0, fixed_now()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, StorageError::NotFound));
    }

    #[tokio::test]
    async fn each_applied_write_bumps_version_by_one() {
        let repo = InMemoryRepository::new();
        ensure_exists(&repo, &key(), &Activity::empty(fixed_now()))
            .await
            .unwrap();

        for expected in 2..=4 {
            let outcome =
                update_with_retry(&repo, &key(), &BackoffPolicy::immediate(3), |a: &Activity| {
                    Update::Write(a.with_added_minutes(0.17, fixed_now()))
                })
                .await
                .unwrap();
            assert_eq!(outcome.record().version, expected);
        }

        let stored: Versioned<Activity> = repo.read(&key()).await.unwrap().unwrap();
        assert_eq!(stored.payload.total_minutes(), 0.51);
    }

    #[tokio::test]
    async fn skip_leaves_version_untouched() {
        let repo = InMemoryRepository::new();
        ensure_exists(&repo, &key(), &Activity::empty(fixed_now()))
            .await
            .unwrap();
        let policy = BackoffPolicy::immediate(3);
        let outcome = update_with_retry(&repo, &key(), &policy, |_: &Activity| Update::Skip)
            .await
            .unwrap();
        assert!(!outcome.was_applied());
        assert_eq!(outcome.record().version, 1);
    }

    #[tokio::test]
    async fn upsert_creates_at_initial_version() {
        let repo = InMemoryRepository::new();
        let policy = BackoffPolicy::immediate(3);
        let outcome = upsert_with_retry(&repo, &key(), &policy, |current: Option<&Activity>| {
            Update::Write(
                current
                    .cloned()
                    .unwrap_or_else(|| Activity::empty(fixed_now()))
                    .with_added_minutes(2.0, fixed_now()),
            )
        })
        .await
        .unwrap();
        assert!(outcome.was_applied());
        assert_eq!(outcome.record().version, 1);
        assert_eq!(outcome.record().payload.total_minutes(), 2.0);
    }

    #[tokio::test]
    async fn ensure_exists_is_idempotent() {
        let repo = InMemoryRepository::new();
        let empty = Activity::empty(fixed_now());
        assert_eq!(
            ensure_exists(&repo, &key(), &empty).await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            ensure_exists(&repo, &key(), &empty).await.unwrap(),
            InsertOutcome::AlreadyExists
        );
    }
}
