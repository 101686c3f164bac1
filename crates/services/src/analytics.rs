use std::sync::Arc;

use storage::repository::{ActivityRepository, AssessmentRepository};
use study_core::model::{PathId, TopicName, UserId};
use study_core::progress::meets_threshold;
use study_core::rounding::round_to;

use crate::error::TrackerError;

/// Averages below this mark a topic as weak.
pub const WEAK_TOPIC_THRESHOLD: f64 = 0.70;

#[derive(Debug, Clone, PartialEq)]
pub struct TopicMinutes {
    pub path_id: PathId,
    pub topic: TopicName,
    pub minutes: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopicScore {
    pub subject: String,
    pub topic: TopicName,
    pub average: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LearningSummary {
    pub total_minutes: f64,
    pub topic_minutes: Vec<TopicMinutes>,
    pub strong_topics: Vec<TopicScore>,
    pub weak_topics: Vec<TopicScore>,
    pub recommendations: Vec<String>,
}

/// Read-only study statistics across all of a user's paths.
pub struct LearningAnalytics {
    activities: Arc<dyn ActivityRepository>,
    assessments: Arc<dyn AssessmentRepository>,
}

impl LearningAnalytics {
    #[must_use]
    pub fn new(
        activities: Arc<dyn ActivityRepository>,
        assessments: Arc<dyn AssessmentRepository>,
    ) -> Self {
        Self {
            activities,
            assessments,
        }
    }

    /// # Errors
    ///
    /// Returns `TrackerError::Storage` on backend failure.
    pub async fn summary(&self, user_id: UserId) -> Result<LearningSummary, TrackerError> {
        let topic_minutes: Vec<TopicMinutes> = self
            .activities
            .list_for_user(user_id)
            .await?
            .into_iter()
            .map(|(key, record)| TopicMinutes {
                path_id: key.path_id,
                topic: key.topic,
                minutes: record.payload.total_minutes(),
            })
            .collect();
        let total_minutes = round_to(topic_minutes.iter().map(|t| t.minutes).sum(), 2);

        let mut strong_topics = Vec::new();
        let mut weak_topics = Vec::new();
        for (key, record) in self.assessments.list_for_user(user_id).await? {
            let Some(average) = record.payload.average_score() else {
                continue;
            };
            let score = TopicScore {
                subject: key.subject,
                topic: key.topic,
                average: round_to(average, 2),
            };
            if meets_threshold(average) {
                strong_topics.push(score);
            } else if average < WEAK_TOPIC_THRESHOLD {
                weak_topics.push(score);
            }
        }
        strong_topics.sort_by(|a, b| b.average.total_cmp(&a.average));
        weak_topics.sort_by(|a, b| a.average.total_cmp(&b.average));

        let recommendations = weak_topics
            .iter()
            .map(|t| {
                format!(
                    "{} ({}): average {:.2}, revisit the core concepts \
                     and practise targeted questions",
                    t.topic, t.subject, t.average
                )
            })
            .chain(strong_topics.iter().map(|t| {
                format!(
                    "{} ({}): average {:.2}, try linking it to neighbouring topics",
                    t.topic, t.subject, t.average
                )
            }))
            .collect();

        Ok(LearningSummary {
            total_minutes,
            topic_minutes,
            strong_topics,
            weak_topics,
            recommendations,
        })
    }
}
