use std::sync::Arc;

use async_trait::async_trait;
use study_core::model::{Difficulty, Exercise, Grade, QuestionKind};
use tracing::warn;

use crate::error::CollaboratorError;

pub const FALLBACK_FEEDBACK: &str =
    "The answer could not be evaluated right now. Please compare it with the correct answer.";

/// Source of generated exercises and answer evaluations.
#[async_trait]
pub trait TutorBackend: Send + Sync {
    async fn generate_exercises(
        &self,
        subject: &str,
        topic: &str,
        difficulty: Difficulty,
        count: usize,
    ) -> Result<Vec<Exercise>, CollaboratorError>;

    async fn evaluate_answer(
        &self,
        subject: &str,
        topic: &str,
        question: &str,
        answer: &str,
        difficulty: Difficulty,
    ) -> Result<Grade, CollaboratorError>;
}

/// Front for the tutor backend that always produces a value.
///
/// Backend failures are logged and replaced by deterministic fallbacks, so
/// callers never see a `CollaboratorError`.
#[derive(Clone, Default)]
pub struct Tutor {
    backend: Option<Arc<dyn TutorBackend>>,
}

impl Tutor {
    #[must_use]
    pub fn new(backend: Arc<dyn TutorBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// A tutor with no backend; every call returns the fallback.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub async fn generate_exercises(
        &self,
        subject: &str,
        topic: &str,
        difficulty: Difficulty,
        count: usize,
    ) -> Vec<Exercise> {
        let result = match &self.backend {
            Some(backend) => {
                backend
                    .generate_exercises(subject, topic, difficulty, count)
                    .await
            }
            None => Err(CollaboratorError::Disabled),
        };
        match result.and_then(|exercises| {
            if exercises.is_empty() {
                Err(CollaboratorError::EmptyResponse)
            } else {
                Ok(exercises)
            }
        }) {
            Ok(exercises) => exercises
                .into_iter()
                .take(count)
                .map(Exercise::normalized)
                .collect(),
            Err(err) => {
                warn!(subject, topic, error = %err, "using default exercises");
                default_exercises(subject, topic, difficulty, count)
            }
        }
    }

    pub async fn evaluate_answer(
        &self,
        subject: &str,
        topic: &str,
        question: &str,
        answer: &str,
        difficulty: Difficulty,
    ) -> Grade {
        let result = match &self.backend {
            Some(backend) => {
                backend
                    .evaluate_answer(subject, topic, question, answer, difficulty)
                    .await
            }
            None => Err(CollaboratorError::Disabled),
        };
        result
            .and_then(|grade| {
                Grade::new(grade.score, grade.feedback, grade.explanation)
                    .map_err(|err| CollaboratorError::Malformed(err.to_string()))
            })
            .unwrap_or_else(|err| {
                warn!(subject, topic, error = %err, "using fallback evaluation");
                fallback_grade(topic)
            })
    }
}

/// Placeholder questions served when the backend is unavailable.
#[must_use]
pub fn default_exercises(
    subject: &str,
    topic: &str,
    difficulty: Difficulty,
    count: usize,
) -> Vec<Exercise> {
    let options: Vec<String> = (1..=4)
        .map(|n| format!("{topic}: option {n} unavailable, please regenerate"))
        .collect();
    (0..count)
        .map(|i| {
            let correct_option = i % options.len();
            Exercise {
                question: format!(
                    "What is the key principle of {topic} in {subject}? (Q{})",
                    i + 1
                ),
                kind: QuestionKind::MultipleChoice,
                explanation: format!(
                    "Tests the core principles of {topic} in {subject}. \
                     The correct answer is \"{}\".",
                    options[correct_option]
                ),
                options: options.clone(),
                correct_option,
                difficulty,
                estimated_minutes: u32::try_from(i)
                    .unwrap_or(u32::MAX)
                    .saturating_mul(5)
                    .saturating_add(15),
            }
        })
        .collect()
}

fn fallback_grade(topic: &str) -> Grade {
    Grade {
        score: 0.0,
        feedback: FALLBACK_FEEDBACK.to_string(),
        explanation: format!("Complete more assessments on {topic} for personalised suggestions."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    #[async_trait]
    impl TutorBackend for Broken {
        async fn generate_exercises(
            &self,
            _: &str,
            _: &str,
            _: Difficulty,
            _: usize,
        ) -> Result<Vec<Exercise>, CollaboratorError> {
            Err(CollaboratorError::Malformed("garbage".into()))
        }

        async fn evaluate_answer(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &str,
            _: Difficulty,
        ) -> Result<Grade, CollaboratorError> {
            Err(CollaboratorError::Timeout)
        }
    }

    #[test]
    fn default_exercises_are_deterministic() {
        let first = default_exercises("Rust", "Traits", Difficulty::Beginner, 5);
        assert_eq!(first, default_exercises("Rust", "Traits", Difficulty::Beginner, 5));
        assert_eq!(first.len(), 5);
        assert_eq!(first[4].correct_option, 0);
        assert_eq!(first[2].estimated_minutes, 25);
        assert!(first.iter().all(|e| e.options.len() == 4));
        assert_eq!(
            first[0].question,
            "What is the key principle of Traits in Rust? (Q1)"
        );
    }

    #[tokio::test]
    async fn failing_backend_falls_back() {
        let tutor = Tutor::new(Arc::new(Broken));
        let exercises = tutor
            .generate_exercises("Rust", "Traits", Difficulty::Advanced, 2)
            .await;
        assert_eq!(
            exercises,
            default_exercises("Rust", "Traits", Difficulty::Advanced, 2)
        );

        let grade = tutor
            .evaluate_answer("Rust", "Traits", "q", "a", Difficulty::Advanced)
            .await;
        assert_eq!(grade.score, 0.0);
        assert_eq!(grade.feedback, FALLBACK_FEEDBACK);
    }

    struct Overgenerous(f64);

    #[async_trait]
    impl TutorBackend for Overgenerous {
        async fn generate_exercises(
            &self,
            _: &str,
            _: &str,
            _: Difficulty,
            _: usize,
        ) -> Result<Vec<Exercise>, CollaboratorError> {
            Ok(Vec::new())
        }

        async fn evaluate_answer(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &str,
            _: Difficulty,
        ) -> Result<Grade, CollaboratorError> {
            Ok(Grade {
                score: self.0,
                feedback: "excellent".into(),
                explanation: String::new(),
            })
        }
    }

    #[tokio::test]
    async fn out_of_range_scores_fall_back() {
        for score in [1.5, -0.1, f64::NAN] {
            let tutor = Tutor::new(Arc::new(Overgenerous(score)));
            let grade = tutor
                .evaluate_answer("Rust", "Traits", "q", "a", Difficulty::Beginner)
                .await;
            assert_eq!(grade.score, 0.0);
            assert_eq!(grade.feedback, FALLBACK_FEEDBACK);
        }

        let tutor = Tutor::new(Arc::new(Overgenerous(1.0)));
        let grade = tutor
            .evaluate_answer("Rust", "Traits", "q", "a", Difficulty::Beginner)
            .await;
        assert_eq!(grade.score, 1.0);
        assert_eq!(grade.feedback, "excellent");
    }

    #[tokio::test]
    async fn disabled_tutor_uses_fallbacks() {
        let tutor = Tutor::disabled();
        assert!(!tutor.enabled());
        let exercises = tutor
            .generate_exercises("Rust", "Traits", Difficulty::Beginner, 3)
            .await;
        assert_eq!(exercises.len(), 3);
    }
}
