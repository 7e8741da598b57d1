//! Input validation errors.

use thiserror::Error;

pub type ValidationResult<T> = Result<T, ValidationError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid time range: {0}")]
    InvalidRange(String),

    #[error("Too many chunks: {chunks} (max {max})")]
    TooManyChunks { chunks: usize, max: usize },

    #[error("Invalid language code: {0}")]
    InvalidLanguage(String),

    #[error("Source and target language are both '{0}'")]
    SameLanguage(String),
}
