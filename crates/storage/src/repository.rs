use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use study_core::model::{
    Activity, ActivityKey, AssessmentKey, AssessmentRecord, LearningPath, PathId, PathKey,
    TopicName, UserId, Versioned,
};
use thiserror::Error;

use crate::versioned::{InsertOutcome, VersionedStore, WriteOutcome};

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("concurrent writers won {attempts} consecutive attempts")]
    ConcurrencyExhausted { attempts: u32 },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Learning paths owned by users.
///
/// Paths are versioned by `(user, path)`; ids are assigned by the store on
/// [`PathRepository::insert_path`].
#[async_trait]
pub trait PathRepository: VersionedStore<PathKey, LearningPath> {
    /// Insert a new path at the initial version and return its id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the path cannot be stored.
    async fn insert_path(
        &self,
        user_id: UserId,
        path: &LearningPath,
        created_at: DateTime<Utc>,
    ) -> Result<PathId, StorageError>;

    /// All of a user's paths, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if rows cannot be read or decoded.
    async fn list_paths(
        &self,
        user_id: UserId,
    ) -> Result<Vec<(PathId, Versioned<LearningPath>)>, StorageError>;

    /// Delete a path and its activities. Returns `false` when nothing matched.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn delete_path(&self, key: &PathKey) -> Result<bool, StorageError>;
}

#[async_trait]
pub trait ActivityRepository: VersionedStore<ActivityKey, Activity> {
    /// Activities of one path, keyed by topic.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if rows cannot be read or decoded.
    async fn activities_for_path(
        &self,
        key: &PathKey,
    ) -> Result<Vec<(TopicName, Versioned<Activity>)>, StorageError>;

    /// Every activity the user has, across paths.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if rows cannot be read or decoded.
    async fn list_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<(ActivityKey, Versioned<Activity>)>, StorageError>;

    /// Sum of `total_minutes` over all of the user's activities.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn total_minutes_for_user(&self, user_id: UserId) -> Result<f64, StorageError>;
}

#[async_trait]
pub trait AssessmentRepository: VersionedStore<AssessmentKey, AssessmentRecord> {
    /// Remove every record for the key. Returns the number of rows deleted.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn delete_all(&self, key: &AssessmentKey) -> Result<u64, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if rows cannot be read or decoded.
    async fn list_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<(AssessmentKey, Versioned<AssessmentRecord>)>, StorageError>;
}

/// Aggregates the repositories behind trait objects so services can share
/// one backend.
#[derive(Clone)]
pub struct Storage {
    pub paths: Arc<dyn PathRepository>,
    pub activities: Arc<dyn ActivityRepository>,
    pub assessments: Arc<dyn AssessmentRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_repository(InMemoryRepository::new())
    }

    /// Use one repository value for every concern.
    pub fn from_repository<R>(repo: R) -> Self
    where
        R: PathRepository + ActivityRepository + AssessmentRepository + Clone + 'static,
    {
        Self {
            paths: Arc::new(repo.clone()),
            activities: Arc::new(repo.clone()),
            assessments: Arc::new(repo),
        }
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

/// Mutex-guarded map with the same compare-and-swap semantics as the SQL
/// `UPDATE ... WHERE version = ?` path.
struct VersionedTable<K, P> {
    rows: Mutex<HashMap<K, Versioned<P>>>,
}

impl<K: Eq + Hash + Clone, P: Clone> VersionedTable<K, P> {
    fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
        }
    }

    fn read(&self, key: &K) -> Result<Option<Versioned<P>>, StorageError> {
        let guard = self.rows.lock().map_err(poisoned)?;
        Ok(guard.get(key).cloned())
    }

    fn try_write(&self, key: &K, payload: &P, expected: i64) -> Result<WriteOutcome, StorageError> {
        let mut guard = self.rows.lock().map_err(poisoned)?;
        match guard.get_mut(key) {
            Some(row) if row.version == expected => {
                row.payload = payload.clone();
                row.version += 1;
                Ok(WriteOutcome::Applied {
                    version: row.version,
                })
            }
            _ => Ok(WriteOutcome::Stale),
        }
    }

    fn insert_if_absent(&self, key: &K, payload: &P) -> Result<InsertOutcome, StorageError> {
        let mut guard = self.rows.lock().map_err(poisoned)?;
        if guard.contains_key(key) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        guard.insert(key.clone(), Versioned::initial(payload.clone()));
        Ok(InsertOutcome::Inserted)
    }

    fn collect<T>(
        &self,
        pick: impl Fn(&K, &Versioned<P>) -> Option<T>,
    ) -> Result<Vec<T>, StorageError> {
        let guard = self.rows.lock().map_err(poisoned)?;
        Ok(guard.iter().filter_map(|(k, v)| pick(k, v)).collect())
    }

    fn remove_where(&self, pred: impl Fn(&K) -> bool) -> Result<u64, StorageError> {
        let mut guard = self.rows.lock().map_err(poisoned)?;
        let before = guard.len();
        guard.retain(|k, _| !pred(k));
        Ok((before - guard.len()) as u64)
    }
}

/// In-memory repository for tests and prototyping.
#[derive(Clone)]
pub struct InMemoryRepository {
    paths: Arc<VersionedTable<PathKey, LearningPath>>,
    activities: Arc<VersionedTable<ActivityKey, Activity>>,
    assessments: Arc<VersionedTable<AssessmentKey, AssessmentRecord>>,
    next_path_id: Arc<Mutex<u64>>,
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self {
            paths: Arc::new(VersionedTable::new()),
            activities: Arc::new(VersionedTable::new()),
            assessments: Arc::new(VersionedTable::new()),
            next_path_id: Arc::new(Mutex::new(1)),
        }
    }
}

#[async_trait]
impl VersionedStore<PathKey, LearningPath> for InMemoryRepository {
    async fn read(&self, key: &PathKey) -> Result<Option<Versioned<LearningPath>>, StorageError> {
        self.paths.read(key)
    }

    async fn try_write(
        &self,
        key: &PathKey,
        payload: &LearningPath,
        expected_version: i64,
    ) -> Result<WriteOutcome, StorageError> {
        self.paths.try_write(key, payload, expected_version)
    }

    async fn insert_if_absent(
        &self,
        key: &PathKey,
        payload: &LearningPath,
    ) -> Result<InsertOutcome, StorageError> {
        let outcome = self.paths.insert_if_absent(key, payload)?;
        let mut next = self.next_path_id.lock().map_err(poisoned)?;
        *next = (*next).max(key.path_id.value() + 1);
        Ok(outcome)
    }
}

#[async_trait]
impl PathRepository for InMemoryRepository {
    async fn insert_path(
        &self,
        user_id: UserId,
        path: &LearningPath,
        _created_at: DateTime<Utc>,
    ) -> Result<PathId, StorageError> {
        let id = {
            let mut next = self.next_path_id.lock().map_err(poisoned)?;
            let id = PathId::new(*next);
            *next += 1;
            id
        };
        match self.paths.insert_if_absent(&PathKey::new(user_id, id), path)? {
            InsertOutcome::Inserted => Ok(id),
            InsertOutcome::AlreadyExists => Err(StorageError::Conflict),
        }
    }

    async fn list_paths(
        &self,
        user_id: UserId,
    ) -> Result<Vec<(PathId, Versioned<LearningPath>)>, StorageError> {
        let mut paths = self.paths.collect(|k, v| {
            (k.user_id == user_id).then(|| (k.path_id, v.clone()))
        })?;
        paths.sort_by_key(|(id, _)| *id);
        Ok(paths)
    }

    async fn delete_path(&self, key: &PathKey) -> Result<bool, StorageError> {
        let removed = self.paths.remove_where(|k| k == key)?;
        if removed > 0 {
            self.activities.remove_where(|k| k.path_key() == *key)?;
        }
        Ok(removed > 0)
    }
}

#[async_trait]
impl VersionedStore<ActivityKey, Activity> for InMemoryRepository {
    async fn read(&self, key: &ActivityKey) -> Result<Option<Versioned<Activity>>, StorageError> {
        self.activities.read(key)
    }

    async fn try_write(
        &self,
        key: &ActivityKey,
        payload: &Activity,
        expected_version: i64,
    ) -> Result<WriteOutcome, StorageError> {
        self.activities.try_write(key, payload, expected_version)
    }

    async fn insert_if_absent(
        &self,
        key: &ActivityKey,
        payload: &Activity,
    ) -> Result<InsertOutcome, StorageError> {
        self.activities.insert_if_absent(key, payload)
    }
}

#[async_trait]
impl ActivityRepository for InMemoryRepository {
    async fn activities_for_path(
        &self,
        key: &PathKey,
    ) -> Result<Vec<(TopicName, Versioned<Activity>)>, StorageError> {
        let mut found = self.activities.collect(|k, v| {
            (k.path_key() == *key).then(|| (k.topic.clone(), v.clone()))
        })?;
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<(ActivityKey, Versioned<Activity>)>, StorageError> {
        let mut found = self
            .activities
            .collect(|k, v| (k.user_id == user_id).then(|| (k.clone(), v.clone())))?;
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }

    async fn total_minutes_for_user(&self, user_id: UserId) -> Result<f64, StorageError> {
        let minutes = self.activities.collect(|k, v| {
            (k.user_id == user_id).then(|| v.payload.total_minutes())
        })?;
        Ok(minutes.into_iter().sum())
    }
}

#[async_trait]
impl VersionedStore<AssessmentKey, AssessmentRecord> for InMemoryRepository {
    async fn read(
        &self,
        key: &AssessmentKey,
    ) -> Result<Option<Versioned<AssessmentRecord>>, StorageError> {
        self.assessments.read(key)
    }

    async fn try_write(
        &self,
        key: &AssessmentKey,
        payload: &AssessmentRecord,
        expected_version: i64,
    ) -> Result<WriteOutcome, StorageError> {
        self.assessments.try_write(key, payload, expected_version)
    }

    async fn insert_if_absent(
        &self,
        key: &AssessmentKey,
        payload: &AssessmentRecord,
    ) -> Result<InsertOutcome, StorageError> {
        self.assessments.insert_if_absent(key, payload)
    }
}

#[async_trait]
impl AssessmentRepository for InMemoryRepository {
    async fn delete_all(&self, key: &AssessmentKey) -> Result<u64, StorageError> {
        self.assessments.remove_where(|k| k == key)
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<(AssessmentKey, Versioned<AssessmentRecord>)>, StorageError> {
        let mut found = self
            .assessments
            .collect(|k, v| (k.user_id == user_id).then(|| (k.clone(), v.clone())))?;
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use study_core::model::{Difficulty, ResourceId, TopicDefinition};
    use study_core::time::fixed_now;

    fn path() -> LearningPath {
        LearningPath::new(
            "Rust",
            Difficulty::Beginner,
            vec![TopicDefinition::new("Ownership", vec![ResourceId::new("book")])],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn stale_write_is_rejected_without_change() {
        let repo = InMemoryRepository::new();
        let key = ActivityKey::new(UserId::new(1), PathId::new(1), "Ownership");
        let empty = Activity::empty(fixed_now());
        repo.insert_if_absent(&key, &empty).await.unwrap();

        let longer = empty.with_added_minutes(1.0, fixed_now());
        assert_eq!(
            repo.try_write(&key, &longer, 1).await.unwrap(),
            WriteOutcome::Applied { version: 2 }
        );
        assert_eq!(
            repo.try_write(&key, &empty, 1).await.unwrap(),
            WriteOutcome::Stale
        );

        let stored: Versioned<Activity> = repo.read(&key).await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.payload.total_minutes(), 1.0);
    }

    #[tokio::test]
    async fn deleting_a_path_cascades_to_its_activities() {
        let repo = InMemoryRepository::new();
        let user = UserId::new(7);
        let id = repo.insert_path(user, &path(), fixed_now()).await.unwrap();
        let key = ActivityKey::new(user, id, "Ownership");
        repo.insert_if_absent(&key, &Activity::empty(fixed_now()))
            .await
            .unwrap();

        assert!(repo.delete_path(&PathKey::new(user, id)).await.unwrap());
        assert!(
            ActivityRepository::list_for_user(&repo, user)
                .await
                .unwrap()
                .is_empty()
        );
        assert!(!repo.delete_path(&PathKey::new(user, id)).await.unwrap());
    }

    #[tokio::test]
    async fn path_ids_are_assigned_in_order() {
        let repo = InMemoryRepository::new();
        let user = UserId::new(1);
        let a = repo.insert_path(user, &path(), fixed_now()).await.unwrap();
        let b = repo.insert_path(user, &path(), fixed_now()).await.unwrap();
        assert!(a < b);
        let listed: Vec<PathId> = repo
            .list_paths(user)
            .await
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(listed, vec![a, b]);
    }

    #[tokio::test]
    async fn user_total_sums_across_paths() {
        let repo = InMemoryRepository::new();
        let user = UserId::new(2);
        for (path, minutes) in [(1, 0.34), (2, 0.17)] {
            let key = ActivityKey::new(user, PathId::new(path), "T");
            let activity = Activity::empty(fixed_now()).with_added_minutes(minutes, fixed_now());
            repo.insert_if_absent(&key, &activity).await.unwrap();
        }
        let total = repo.total_minutes_for_user(user).await.unwrap();
        assert!((total - 0.51).abs() < 1e-9);
    }
}
