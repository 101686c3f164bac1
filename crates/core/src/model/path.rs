use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Difficulty, Exercise, ResourceId, TopicName};

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum PathError {
    #[error("subject must not be empty")]
    EmptySubject,

    #[error("learning path needs at least one topic")]
    NoTopics,

    #[error("duplicate topic name: {0}")]
    DuplicateTopic(TopicName),

    #[error("progress {0} is outside 0.0..=1.0")]
    InvalidProgress(f64),
}

/// One topic of a path: the resources a learner can open and the current
/// generation of practice questions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicDefinition {
    pub name: TopicName,
    #[serde(default)]
    pub resources: Vec<ResourceId>,
    #[serde(default)]
    pub questions: Vec<Exercise>,
}

impl TopicDefinition {
    #[must_use]
    pub fn new(name: impl Into<TopicName>, resources: Vec<ResourceId>) -> Self {
        Self {
            name: name.into(),
            resources,
            questions: Vec::new(),
        }
    }
}

/// Path definition plus its cached completion fraction.
///
/// `topics` and the difficulty are serialized into the path row's content
/// column; `progress` is stored in its own column and is only ever written
/// from a calculator result.
#[derive(Debug, Clone, PartialEq)]
pub struct LearningPath {
    subject: String,
    difficulty: Difficulty,
    topics: Vec<TopicDefinition>,
    progress: f64,
}

impl LearningPath {
    /// # Errors
    ///
    /// Returns `PathError` for an empty subject, no topics or a repeated topic name.
    pub fn new(
        subject: impl Into<String>,
        difficulty: Difficulty,
        topics: Vec<TopicDefinition>,
    ) -> Result<Self, PathError> {
        Self::from_persisted(subject.into(), difficulty, topics, 0.0)
    }

    /// # Errors
    ///
    /// Same checks as [`LearningPath::new`], plus `PathError::InvalidProgress`.
    pub fn from_persisted(
        subject: String,
        difficulty: Difficulty,
        topics: Vec<TopicDefinition>,
        progress: f64,
    ) -> Result<Self, PathError> {
        if subject.trim().is_empty() {
            return Err(PathError::EmptySubject);
        }
        if topics.is_empty() {
            return Err(PathError::NoTopics);
        }
        for (i, topic) in topics.iter().enumerate() {
            if topics[..i].iter().any(|t| t.name == topic.name) {
                return Err(PathError::DuplicateTopic(topic.name.clone()));
            }
        }
        if !(0.0..=1.0).contains(&progress) {
            return Err(PathError::InvalidProgress(progress));
        }
        Ok(Self {
            subject,
            difficulty,
            topics,
            progress,
        })
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    #[must_use]
    pub fn topics(&self) -> &[TopicDefinition] {
        &self.topics
    }

    #[must_use]
    pub fn progress(&self) -> f64 {
        self.progress
    }

    #[must_use]
    pub fn topic(&self, name: &TopicName) -> Option<&TopicDefinition> {
        self.topics.iter().find(|t| &t.name == name)
    }

    #[must_use]
    pub fn total_resources(&self) -> usize {
        self.topics.iter().map(|t| t.resources.len()).sum()
    }

    /// # Errors
    ///
    /// Returns `PathError::InvalidProgress` when `progress` is outside `0.0..=1.0`.
    pub fn with_progress(&self, progress: f64) -> Result<Self, PathError> {
        if !(0.0..=1.0).contains(&progress) {
            return Err(PathError::InvalidProgress(progress));
        }
        let mut next = self.clone();
        next.progress = progress;
        Ok(next)
    }

    /// Copy with the topic's question set replaced, or `None` for an unknown topic.
    #[must_use]
    pub fn with_questions(&self, topic: &TopicName, questions: Vec<Exercise>) -> Option<Self> {
        let mut next = self.clone();
        let slot = next.topics.iter_mut().find(|t| &t.name == topic)?;
        slot.questions = questions;
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(name: &str, n: usize) -> TopicDefinition {
        TopicDefinition::new(
            name,
            (0..n).map(|i| ResourceId::new(format!("{name}-{i}"))).collect(),
        )
    }

    #[test]
    fn rejects_duplicate_topics() {
        let err = LearningPath::new(
            "Rust",
            Difficulty::Beginner,
            vec![topic("Ownership", 1), topic("Ownership", 2)],
        )
        .unwrap_err();
        assert_eq!(err, PathError::DuplicateTopic(TopicName::new("Ownership")));
    }

    #[test]
    fn new_path_starts_with_zero_progress() {
        let path = LearningPath::new(
            "Rust",
            Difficulty::Intermediate,
            vec![topic("Ownership", 3), topic("Traits", 2)],
        )
        .unwrap();
        assert_eq!(path.progress(), 0.0);
        assert_eq!(path.total_resources(), 5);
    }

    #[test]
    fn with_questions_ignores_unknown_topic() {
        let path = LearningPath::new("Rust", Difficulty::Beginner, vec![topic("Ownership", 1)])
            .unwrap();
        assert!(path
            .with_questions(&TopicName::new("Macros"), Vec::new())
            .is_none());
    }

    #[test]
    fn progress_must_stay_in_unit_interval() {
        let path = LearningPath::new("Rust", Difficulty::Beginner, vec![topic("Ownership", 1)])
            .unwrap();
        assert!(path.with_progress(1.2).is_err());
        assert_eq!(path.with_progress(0.5).unwrap().progress(), 0.5);
    }
}
