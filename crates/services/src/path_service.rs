use std::sync::Arc;

use storage::repository::PathRepository;
use storage::versioned::{Update, VersionedStore, update_with_retry};
use study_core::model::{
    Difficulty, Exercise, LearningPath, PathId, PathKey, TopicDefinition, TopicName, UserId,
    Versioned,
};
use study_core::{BackoffPolicy, Clock};
use tracing::info;

use crate::error::{TrackerError, ValidationError};

/// Creation, lookup and deletion of learning paths.
pub struct PathService {
    clock: Clock,
    policy: BackoffPolicy,
    paths: Arc<dyn PathRepository>,
}

impl PathService {
    #[must_use]
    pub fn new(clock: Clock, policy: BackoffPolicy, paths: Arc<dyn PathRepository>) -> Self {
        Self {
            clock,
            policy,
            paths,
        }
    }

    /// Create a path with zero progress.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Validation` for an invalid definition, or a
    /// storage error.
    pub async fn create_path(
        &self,
        user_id: UserId,
        subject: &str,
        difficulty: Difficulty,
        topics: Vec<TopicDefinition>,
    ) -> Result<PathId, TrackerError> {
        let path = LearningPath::new(subject, difficulty, topics)?;
        let id = self
            .paths
            .insert_path(user_id, &path, self.clock.now())
            .await?;
        info!(user_id = %user_id, path_id = %id, subject, "learning path created");
        Ok(id)
    }

    /// # Errors
    ///
    /// Returns `TrackerError::NotFound` when the user has no such path.
    pub async fn get_path(&self, key: &PathKey) -> Result<Versioned<LearningPath>, TrackerError> {
        self.paths
            .read(key)
            .await?
            .ok_or_else(|| TrackerError::NotFound(format!("path {key}")))
    }

    /// # Errors
    ///
    /// Returns a storage error if paths cannot be listed.
    pub async fn list_paths(
        &self,
        user_id: UserId,
    ) -> Result<Vec<(PathId, Versioned<LearningPath>)>, TrackerError> {
        Ok(self.paths.list_paths(user_id).await?)
    }

    /// Delete a path together with its activities.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::NotFound` when nothing was deleted.
    pub async fn delete_path(&self, key: &PathKey) -> Result<(), TrackerError> {
        if !self.paths.delete_path(key).await? {
            return Err(TrackerError::NotFound(format!("path {key}")));
        }
        info!(%key, "learning path deleted");
        Ok(())
    }

    /// Replace a topic's question set.
    ///
    /// # Errors
    ///
    /// - `TrackerError::NotFound` for a missing path.
    /// - `ValidationError::UnknownTopic` when the topic is not in the path.
    /// - `TrackerError::ConcurrencyExhausted` if writers kept winning the race.
    pub async fn store_topic_questions(
        &self,
        key: &PathKey,
        topic: &TopicName,
        questions: Vec<Exercise>,
    ) -> Result<Versioned<LearningPath>, TrackerError> {
        let current = self.get_path(key).await?;
        if current.payload.topic(topic).is_none() {
            return Err(ValidationError::UnknownTopic(topic.clone()).into());
        }

        let outcome = update_with_retry(&*self.paths, key, &self.policy, |path: &LearningPath| {
            path.with_questions(topic, questions.clone())
                .map_or(Update::Skip, Update::Write)
        })
        .await?;
        info!(%key, %topic, count = questions.len(), "topic questions stored");
        Ok(outcome.into_record())
    }
}
