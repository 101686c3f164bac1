use std::fmt;

use crate::model::{PathId, TopicName, UserId};

/// Version assigned to a record by its first successful write.
pub const INITIAL_VERSION: i64 = 1;

/// A persisted payload together with the version it was read at.
///
/// The version is the only concurrency-control field: a conditional write that
/// carries it succeeds only while no other writer has bumped it in between.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub payload: T,
    pub version: i64,
}

impl<T> Versioned<T> {
    #[must_use]
    pub fn new(payload: T, version: i64) -> Self {
        Self { payload, version }
    }

    #[must_use]
    pub fn initial(payload: T) -> Self {
        Self::new(payload, INITIAL_VERSION)
    }

    /// The version the store will assign after one more accepted write.
    #[must_use]
    pub fn next_version(&self) -> i64 {
        self.version + 1
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Versioned<U> {
        Versioned {
            payload: f(self.payload),
            version: self.version,
        }
    }
}

/// Key of a learning path row: the owning user plus the path id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathKey {
    pub user_id: UserId,
    pub path_id: PathId,
}

impl PathKey {
    #[must_use]
    pub fn new(user_id: UserId, path_id: PathId) -> Self {
        Self { user_id, path_id }
    }
}

/// Key of an activity row: (user, path, topic).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActivityKey {
    pub user_id: UserId,
    pub path_id: PathId,
    pub topic: TopicName,
}

impl ActivityKey {
    #[must_use]
    pub fn new(user_id: UserId, path_id: PathId, topic: impl Into<TopicName>) -> Self {
        Self {
            user_id,
            path_id,
            topic: topic.into(),
        }
    }

    #[must_use]
    pub fn path_key(&self) -> PathKey {
        PathKey::new(self.user_id, self.path_id)
    }
}

/// Key of an assessment row: (user, subject, topic).
///
/// Assessments are scoped by subject rather than path, so two paths on the
/// same subject share a topic's assessment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssessmentKey {
    pub user_id: UserId,
    pub subject: String,
    pub topic: TopicName,
}

impl AssessmentKey {
    #[must_use]
    pub fn new(user_id: UserId, subject: impl Into<String>, topic: impl Into<TopicName>) -> Self {
        Self {
            user_id,
            subject: subject.into(),
            topic: topic.into(),
        }
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user={} path={}", self.user_id, self.path_id)
    }
}

impl fmt::Display for ActivityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "user={} path={} topic={}",
            self.user_id, self.path_id, self.topic
        )
    }
}

impl fmt::Display for AssessmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "user={} subject={} topic={}",
            self.user_id, self.subject, self.topic
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_record_starts_at_version_one() {
        let record = Versioned::initial("payload");
        assert_eq!(record.version, 1);
        assert_eq!(record.next_version(), 2);
    }

    #[test]
    fn activity_key_projects_path_key() {
        let key = ActivityKey::new(UserId::new(3), PathId::new(9), "Borrowing");
        assert_eq!(key.path_key(), PathKey::new(UserId::new(3), PathId::new(9)));
        assert_eq!(key.to_string(), "user=3 path=9 topic=Borrowing");
    }
}
