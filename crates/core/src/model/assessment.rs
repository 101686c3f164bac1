use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of answer options every multiple-choice exercise carries.
pub const OPTIONS_PER_EXERCISE: usize = 4;

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum AssessmentError {
    #[error("assessment has no questions")]
    NoQuestions,

    #[error("question index {index} out of range (have {len})")]
    QuestionOutOfRange { index: usize, len: usize },

    #[error("assessment already submitted")]
    AlreadySubmitted,

    #[error("unanswered questions: {missing:?}")]
    Unanswered { missing: Vec<usize> },

    #[error("expected {expected} grades, got {actual}")]
    GradeCountMismatch { expected: usize, actual: usize },

    #[error("score {0} is outside 0.0..=1.0")]
    ScoreOutOfRange(f64),

    #[error("persisted record is inconsistent: {0}")]
    InconsistentRecord(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Difficulty {
    Beginner,
    #[default]
    Intermediate,
    Advanced,
}

impl Difficulty {
    /// Lenient parse used for collaborator payloads and CLI input.
    #[must_use]
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "beginner" | "easy" => Self::Beginner,
            "advanced" | "hard" => Self::Advanced,
            _ => Self::Intermediate,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Beginner => "Beginner",
            Self::Intermediate => "Intermediate",
            Self::Advanced => "Advanced",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    #[default]
    MultipleChoice,
    OpenEnded,
}

/// A single practice question for a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exercise {
    pub question: String,
    pub kind: QuestionKind,
    pub options: Vec<String>,
    pub correct_option: usize,
    pub explanation: String,
    pub difficulty: Difficulty,
    pub estimated_minutes: u32,
}

impl Exercise {
    /// Pad or truncate the options to exactly four and clamp the correct
    /// option index into range.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        let have = self.options.len();
        if have < OPTIONS_PER_EXERCISE {
            self.options
                .extend((have..OPTIONS_PER_EXERCISE).map(|i| format!("Option {}", i + 1)));
        } else {
            self.options.truncate(OPTIONS_PER_EXERCISE);
        }
        self.correct_option = self.correct_option.min(OPTIONS_PER_EXERCISE - 1);
        self
    }

    #[must_use]
    pub fn correct_answer(&self) -> Option<&str> {
        self.options.get(self.correct_option).map(String::as_str)
    }
}

/// Outcome of grading one answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grade {
    pub score: f64,
    pub feedback: String,
    #[serde(default)]
    pub explanation: String,
}

impl Grade {
    /// # Errors
    ///
    /// Returns `AssessmentError::ScoreOutOfRange` when `score` is not within `0.0..=1.0`.
    pub fn new(
        score: f64,
        feedback: impl Into<String>,
        explanation: impl Into<String>,
    ) -> Result<Self, AssessmentError> {
        if !(0.0..=1.0).contains(&score) {
            return Err(AssessmentError::ScoreOutOfRange(score));
        }
        Ok(Self {
            score,
            feedback: feedback.into(),
            explanation: explanation.into(),
        })
    }
}

/// Persisted outcome of one submitted generation of questions.
///
/// Replaced wholesale on every submission; `scores`, `feedback` and
/// `explanations` are parallel to `questions`.
#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentRecord {
    questions: Vec<Exercise>,
    answers: Vec<String>,
    scores: Vec<f64>,
    feedback: Vec<String>,
    explanations: Vec<String>,
    submitted: bool,
    taken_at: DateTime<Utc>,
}

impl AssessmentRecord {
    /// Rehydrate a record from persisted storage.
    ///
    /// Rows written before explanations were stored carry none; they are
    /// padded with empty strings.
    ///
    /// # Errors
    ///
    /// Returns `AssessmentError::InconsistentRecord` if scores, feedback and
    /// explanations are not parallel or a score is out of range.
    pub fn from_persisted(
        questions: Vec<Exercise>,
        answers: Vec<String>,
        scores: Vec<f64>,
        feedback: Vec<String>,
        mut explanations: Vec<String>,
        submitted: bool,
        taken_at: DateTime<Utc>,
    ) -> Result<Self, AssessmentError> {
        if scores.len() != feedback.len() {
            return Err(AssessmentError::InconsistentRecord(format!(
                "{} scores vs {} feedback entries",
                scores.len(),
                feedback.len()
            )));
        }
        if explanations.is_empty() {
            explanations = vec![String::new(); scores.len()];
        } else if explanations.len() != scores.len() {
            return Err(AssessmentError::InconsistentRecord(format!(
                "{} scores vs {} explanations",
                scores.len(),
                explanations.len()
            )));
        }
        if let Some(bad) = scores.iter().find(|s| !(0.0..=1.0).contains(*s)) {
            return Err(AssessmentError::InconsistentRecord(format!(
                "score {bad} out of range"
            )));
        }
        Ok(Self {
            questions,
            answers,
            scores,
            feedback,
            explanations,
            submitted,
            taken_at,
        })
    }

    #[must_use]
    pub fn questions(&self) -> &[Exercise] {
        &self.questions
    }

    #[must_use]
    pub fn answers(&self) -> &[String] {
        &self.answers
    }

    #[must_use]
    pub fn scores(&self) -> &[f64] {
        &self.scores
    }

    #[must_use]
    pub fn feedback(&self) -> &[String] {
        &self.feedback
    }

    #[must_use]
    pub fn explanations(&self) -> &[String] {
        &self.explanations
    }

    #[must_use]
    pub fn submitted(&self) -> bool {
        self.submitted
    }

    #[must_use]
    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    /// Mean score in `0.0..=1.0`, or `None` if the record is not submitted
    /// or holds no scores.
    #[must_use]
    pub fn average_score(&self) -> Option<f64> {
        if !self.submitted {
            return None;
        }
        crate::progress::average_score(&self.scores)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssessmentState {
    NotStarted,
    InProgress,
    Submitted,
}

/// Working state of one topic assessment: the current question set, the
/// learner's answers and, once submitted, the grades.
///
/// `NotStarted -> InProgress` when any answer becomes non-empty;
/// `InProgress -> Submitted` only through [`AssessmentSession::record_grades`]
/// after every question is answered. `Submitted` is terminal; a new question
/// set starts a new session.
#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentSession {
    questions: Vec<Exercise>,
    answers: Vec<String>,
    grades: Option<Vec<Grade>>,
}

impl AssessmentSession {
    /// # Errors
    ///
    /// Returns `AssessmentError::NoQuestions` for an empty question set.
    pub fn new(questions: Vec<Exercise>) -> Result<Self, AssessmentError> {
        if questions.is_empty() {
            return Err(AssessmentError::NoQuestions);
        }
        let answers = vec![String::new(); questions.len()];
        Ok(Self {
            questions,
            answers,
            grades: None,
        })
    }

    /// Rebuild a submitted session from its persisted record without
    /// re-grading.
    ///
    /// # Errors
    ///
    /// Returns `AssessmentError::InconsistentRecord` when the record is not
    /// submitted or its answers/scores do not line up with its questions.
    pub fn from_record(record: &AssessmentRecord) -> Result<Self, AssessmentError> {
        let len = record.questions.len();
        if !record.submitted || len == 0 {
            return Err(AssessmentError::InconsistentRecord(
                "record is not a submitted assessment".into(),
            ));
        }
        if record.answers.len() != len || record.scores.len() != len {
            return Err(AssessmentError::InconsistentRecord(format!(
                "{len} questions, {} answers, {} scores",
                record.answers.len(),
                record.scores.len()
            )));
        }
        let grades = record
            .scores
            .iter()
            .zip(&record.feedback)
            .zip(&record.explanations)
            .map(|((score, feedback), explanation)| Grade {
                score: *score,
                feedback: feedback.clone(),
                explanation: explanation.clone(),
            })
            .collect();
        Ok(Self {
            questions: record.questions.clone(),
            answers: record.answers.clone(),
            grades: Some(grades),
        })
    }

    #[must_use]
    pub fn state(&self) -> AssessmentState {
        if self.grades.is_some() {
            AssessmentState::Submitted
        } else if self.answers.iter().any(|a| !a.trim().is_empty()) {
            AssessmentState::InProgress
        } else {
            AssessmentState::NotStarted
        }
    }

    #[must_use]
    pub fn questions(&self) -> &[Exercise] {
        &self.questions
    }

    #[must_use]
    pub fn answers(&self) -> &[String] {
        &self.answers
    }

    #[must_use]
    pub fn grades(&self) -> Option<&[Grade]> {
        self.grades.as_deref()
    }

    /// Record the learner's answer for question `index`.
    ///
    /// # Errors
    ///
    /// Returns `AssessmentError::AlreadySubmitted` once graded and
    /// `AssessmentError::QuestionOutOfRange` for a bad index.
    pub fn set_answer(
        &mut self,
        index: usize,
        answer: impl Into<String>,
    ) -> Result<AssessmentState, AssessmentError> {
        if self.grades.is_some() {
            return Err(AssessmentError::AlreadySubmitted);
        }
        let len = self.answers.len();
        let slot = self
            .answers
            .get_mut(index)
            .ok_or(AssessmentError::QuestionOutOfRange { index, len })?;
        *slot = answer.into();
        Ok(self.state())
    }

    /// Indices of questions whose answer is empty or whitespace.
    #[must_use]
    pub fn unanswered(&self) -> Vec<usize> {
        self.answers
            .iter()
            .enumerate()
            .filter(|(_, a)| a.trim().is_empty())
            .map(|(i, _)| i)
            .collect()
    }

    /// Check the session may be submitted.
    ///
    /// # Errors
    ///
    /// Returns `AssessmentError::AlreadySubmitted` or
    /// `AssessmentError::Unanswered` listing the empty questions.
    pub fn ensure_submittable(&self) -> Result<(), AssessmentError> {
        if self.grades.is_some() {
            return Err(AssessmentError::AlreadySubmitted);
        }
        let missing = self.unanswered();
        if !missing.is_empty() {
            return Err(AssessmentError::Unanswered { missing });
        }
        Ok(())
    }

    /// Attach grades and move to `Submitted`, producing the record to persist.
    ///
    /// # Errors
    ///
    /// Fails if the session is not submittable, the grade count differs
    /// from the question count, or a score is outside `0.0..=1.0`. The
    /// session is unchanged on error.
    pub fn record_grades(
        &mut self,
        grades: Vec<Grade>,
        taken_at: DateTime<Utc>,
    ) -> Result<AssessmentRecord, AssessmentError> {
        self.ensure_submittable()?;
        if grades.len() != self.questions.len() {
            return Err(AssessmentError::GradeCountMismatch {
                expected: self.questions.len(),
                actual: grades.len(),
            });
        }
        if let Some(bad) = grades.iter().find(|g| !(0.0..=1.0).contains(&g.score)) {
            return Err(AssessmentError::ScoreOutOfRange(bad.score));
        }
        let record = AssessmentRecord {
            questions: self.questions.clone(),
            answers: self.answers.clone(),
            scores: grades.iter().map(|g| g.score).collect(),
            feedback: grades.iter().map(|g| g.feedback.clone()).collect(),
            explanations: grades.iter().map(|g| g.explanation.clone()).collect(),
            submitted: true,
            taken_at,
        };
        self.grades = Some(grades);
        Ok(record)
    }

    #[must_use]
    pub fn average_score(&self) -> Option<f64> {
        let grades = self.grades.as_ref()?;
        let scores: Vec<f64> = grades.iter().map(|g| g.score).collect();
        crate::progress::average_score(&scores)
    }
}
