use std::sync::Arc;

use storage::repository::AssessmentRepository;
use storage::versioned::{Update, VersionedStore, upsert_with_retry};
use study_core::model::{
    ActivityKey, AssessmentError, AssessmentKey, AssessmentRecord, AssessmentSession, Exercise,
    Grade, LearningPath, QuestionKind,
};
use study_core::{BackoffPolicy, Clock};
use tracing::{info, warn};

use crate::ai::Tutor;
use crate::error::{TrackerError, ValidationError};
use crate::path_service::PathService;
use crate::progress_service::{ProgressRefresh, ProgressService};

pub const DEFAULT_QUESTION_COUNT: usize = 3;

/// Result of a successful submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitReport {
    pub average_score: f64,
    pub record_version: i64,
    pub progress: ProgressRefresh,
}

/// Opens, grades and discards topic assessments.
pub struct AssessmentService {
    clock: Clock,
    policy: BackoffPolicy,
    assessments: Arc<dyn AssessmentRepository>,
    paths: Arc<PathService>,
    progress: Arc<ProgressService>,
    tutor: Tutor,
}

impl AssessmentService {
    #[must_use]
    pub fn new(
        clock: Clock,
        policy: BackoffPolicy,
        assessments: Arc<dyn AssessmentRepository>,
        paths: Arc<PathService>,
        progress: Arc<ProgressService>,
        tutor: Tutor,
    ) -> Self {
        Self {
            clock,
            policy,
            assessments,
            paths,
            progress,
            tutor,
        }
    }

    /// Resume the topic's assessment.
    ///
    /// A consistent submitted record comes back as a `Submitted` session.
    /// Otherwise a fresh session over the topic's stored questions is
    /// returned, generating questions first if the topic has none.
    ///
    /// # Errors
    ///
    /// - `TrackerError::NotFound` for a missing path.
    /// - `ValidationError::UnknownTopic` when the topic is not in the path.
    pub async fn open(&self, key: &ActivityKey) -> Result<AssessmentSession, TrackerError> {
        let path = self.paths.get_path(&key.path_key()).await?.payload;
        let questions = topic_questions(&path, key)?;
        let assessment_key = assessment_key_for(&path, key);

        if let Some(record) = self.assessments.read(&assessment_key).await? {
            let record = record.payload;
            if record.submitted() && record.answers().len() == record.questions().len() {
                match AssessmentSession::from_record(&record) {
                    Ok(session) => return Ok(session),
                    Err(err) => warn!(%assessment_key, error = %err, "ignoring stored assessment"),
                }
            }
        }

        if questions.is_empty() {
            return self.regenerate(key, DEFAULT_QUESTION_COUNT).await;
        }
        Ok(AssessmentSession::new(questions)?)
    }

    /// Replace the topic's questions with a new generated set and drop any
    /// stored assessment for it.
    ///
    /// # Errors
    ///
    /// - `ValidationError` when `count` is zero or the topic is unknown.
    /// - `TrackerError::ConcurrencyExhausted` if the path update kept losing.
    pub async fn regenerate(
        &self,
        key: &ActivityKey,
        count: usize,
    ) -> Result<AssessmentSession, TrackerError> {
        if count == 0 {
            return Err(AssessmentError::NoQuestions.into());
        }
        let path_key = key.path_key();
        let path = self.paths.get_path(&path_key).await?.payload;
        topic_questions(&path, key)?;

        let exercises = self
            .tutor
            .generate_exercises(path.subject(), key.topic.as_str(), path.difficulty(), count)
            .await;
        self.paths
            .store_topic_questions(&path_key, &key.topic, exercises.clone())
            .await?;

        let assessment_key = assessment_key_for(&path, key);
        let removed = self.assessments.delete_all(&assessment_key).await?;
        info!(%key, count = exercises.len(), removed, "assessment questions regenerated");
        Ok(AssessmentSession::new(exercises)?)
    }

    /// Grade and persist a fully answered session, then refresh path progress.
    ///
    /// Nothing is written unless every question has an answer. The session
    /// only moves to `Submitted` once the record is stored.
    ///
    /// # Errors
    ///
    /// - `ValidationError::UnansweredQuestions` listing the empty answers.
    /// - `TrackerError::ConcurrencyExhausted` if the record or progress write kept losing.
    pub async fn submit(
        &self,
        key: &ActivityKey,
        session: &mut AssessmentSession,
    ) -> Result<SubmitReport, TrackerError> {
        session.ensure_submittable()?;

        let path_key = key.path_key();
        let path = self.paths.get_path(&path_key).await?.payload;
        if path.topic(&key.topic).is_none() {
            return Err(ValidationError::UnknownTopic(key.topic.clone()).into());
        }

        let mut grades = Vec::with_capacity(session.questions().len());
        for (exercise, answer) in session.questions().iter().zip(session.answers()) {
            grades.push(self.grade(&path, key, exercise, answer).await);
        }

        let mut graded = session.clone();
        let record = graded.record_grades(grades, self.clock.now())?;
        let average_score = graded.average_score().unwrap_or(0.0);

        let assessment_key = assessment_key_for(&path, key);
        let stored = upsert_with_retry(
            &*self.assessments,
            &assessment_key,
            &self.policy,
            |_: Option<&AssessmentRecord>| Update::Write(record.clone()),
        )
        .await?;
        *session = graded;
        info!(%assessment_key, average_score, "assessment submitted");

        let progress = self.progress.refresh(&path_key).await?;
        Ok(SubmitReport {
            average_score,
            record_version: stored.record().version,
            progress,
        })
    }

    /// Throw away the topic's stored assessment and refresh progress.
    ///
    /// Study time and viewed resources are untouched.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::NotFound` for a missing path.
    pub async fn discard(&self, key: &ActivityKey) -> Result<ProgressRefresh, TrackerError> {
        let path_key = key.path_key();
        let path = self.paths.get_path(&path_key).await?.payload;
        let assessment_key = assessment_key_for(&path, key);
        let removed = self.assessments.delete_all(&assessment_key).await?;
        info!(%assessment_key, removed, "assessment discarded");
        self.progress.refresh(&path_key).await
    }

    async fn grade(
        &self,
        path: &LearningPath,
        key: &ActivityKey,
        exercise: &Exercise,
        answer: &str,
    ) -> Grade {
        if let Some(grade) = grade_choice(exercise, answer) {
            return grade;
        }
        self.tutor
            .evaluate_answer(
                path.subject(),
                key.topic.as_str(),
                &exercise.question,
                answer,
                exercise.difficulty,
            )
            .await
    }
}

fn assessment_key_for(path: &LearningPath, key: &ActivityKey) -> AssessmentKey {
    AssessmentKey::new(key.user_id, path.subject(), key.topic.clone())
}

fn topic_questions(path: &LearningPath, key: &ActivityKey) -> Result<Vec<Exercise>, TrackerError> {
    path.topic(&key.topic)
        .map(|topic| topic.questions.clone())
        .ok_or_else(|| ValidationError::UnknownTopic(key.topic.clone()).into())
}

/// Grade a multiple-choice answer that names one of the options.
///
/// Free text, or a question without options, is left to the tutor.
fn grade_choice(exercise: &Exercise, answer: &str) -> Option<Grade> {
    if exercise.kind != QuestionKind::MultipleChoice {
        return None;
    }
    let answer = answer.trim();
    let chosen = exercise.options.iter().position(|o| o.trim() == answer)?;
    let correct = exercise.correct_answer().unwrap_or_default();
    Some(if chosen == exercise.correct_option {
        Grade {
            score: 1.0,
            feedback: "Correct.".to_string(),
            explanation: exercise.explanation.clone(),
        }
    } else {
        Grade {
            score: 0.0,
            feedback: format!("Incorrect. The correct answer is \"{correct}\"."),
            explanation: exercise.explanation.clone(),
        }
    })
}
