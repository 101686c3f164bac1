use thiserror::Error;

use crate::model::{ActivityError, AssessmentError, PathError};
use crate::timer::TimerError;

/// Any domain rule violation raised by this crate.
#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Activity(#[from] ActivityError),
    #[error(transparent)]
    Assessment(#[from] AssessmentError),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Timer(#[from] TimerError),
}
