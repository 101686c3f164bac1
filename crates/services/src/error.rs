//! Shared error types for the services crate.

use thiserror::Error;

use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;
use study_core::model::{AssessmentError, PathError, TopicName};
use study_core::timer::TimerError;

use crate::config::ConfigError;

/// Input rejected before anything was written.
#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("{} question(s) still unanswered", .missing.len())]
    UnansweredQuestions { missing: Vec<usize> },

    #[error("tick of {minutes} minutes is below the 0.01 minute minimum")]
    TickBelowMinimum { minutes: f64 },

    #[error("topic {0} is not part of this path")]
    UnknownTopic(TopicName),

    #[error(transparent)]
    Assessment(AssessmentError),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error("heartbeat interval must be positive")]
    Heartbeat,
}

impl From<AssessmentError> for ValidationError {
    fn from(err: AssessmentError) -> Self {
        match err {
            AssessmentError::Unanswered { missing } => Self::UnansweredQuestions { missing },
            other => Self::Assessment(other),
        }
    }
}

impl From<TimerError> for ValidationError {
    fn from(err: TimerError) -> Self {
        match err {
            TimerError::BelowMinimum { minutes } => Self::TickBelowMinimum { minutes },
            _ => Self::Heartbeat,
        }
    }
}

/// Errors emitted by the tracking services.
///
/// Every variant is scoped to one operation; prior state is left intact.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TrackerError {
    #[error("concurrent writers won {attempts} consecutive attempts; nothing was written")]
    ConcurrencyExhausted { attempts: u32 },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Storage(StorageError),
}

impl TrackerError {
    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyExhausted { .. })
    }
}

impl From<StorageError> for TrackerError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => Self::NotFound("record".into()),
            StorageError::ConcurrencyExhausted { attempts } => {
                Self::ConcurrencyExhausted { attempts }
            }
            other => Self::Storage(other),
        }
    }
}

impl From<AssessmentError> for TrackerError {
    fn from(err: AssessmentError) -> Self {
        Self::Validation(err.into())
    }
}

impl From<PathError> for TrackerError {
    fn from(err: PathError) -> Self {
        Self::Validation(err.into())
    }
}

impl From<TimerError> for TrackerError {
    fn from(err: TimerError) -> Self {
        Self::Validation(err.into())
    }
}

/// Failures of the AI tutor collaborator. Never leaves the `Tutor` façade.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CollaboratorError {
    #[error("AI tutor is not configured")]
    Disabled,
    #[error("AI tutor request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("AI tutor timed out")]
    Timeout,
    #[error("AI tutor returned an empty response")]
    EmptyResponse,
    #[error("AI tutor returned a malformed payload: {0}")]
    Malformed(String),
}

impl CollaboratorError {
    /// Transport-level failures worth another attempt.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Http(_) => true,
            Self::HttpStatus(status) => {
                status.is_server_error() || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
