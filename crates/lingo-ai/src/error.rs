//! AI stage error types.

use lingo_models::ErrorKind;
use thiserror::Error;

pub type AiResult<T> = Result<T, AiError>;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("Unsupported media: {0}")]
    UnsupportedMedia(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Media not found: {0}")]
    MediaNotFound(String),

    #[error("No translation available for language '{0}'")]
    MissingTranslation(String),

    #[error("AI service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Rate limited by AI service")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("AI service returned {status}: {body}")]
    RequestFailed { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AiError {
    pub fn unsupported_media(msg: impl Into<String>) -> Self {
        Self::UnsupportedMedia(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Map an HTTP status from the AI service onto an error.
    pub fn from_status(status: u16, body: impl Into<String>, retry_after_ms: Option<u64>) -> Self {
        let body = body.into();
        match status {
            429 => Self::RateLimited { retry_after_ms },
            503 => Self::ServiceUnavailable(body),
            415 => Self::UnsupportedMedia(body),
            400 | 413 | 422 => Self::InvalidRequest(body),
            _ => Self::RequestFailed { status, body },
        }
    }

    /// Classify into the shared error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AiError::UnsupportedMedia(_)
            | AiError::InvalidRequest(_)
            | AiError::MediaNotFound(_)
            | AiError::MissingTranslation(_) => ErrorKind::Permanent,
            AiError::RequestFailed { status, .. } => {
                if *status == 408 || *status >= 500 {
                    ErrorKind::Transient
                } else {
                    ErrorKind::Permanent
                }
            }
            AiError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ErrorKind::Permanent,
            AiError::ServiceUnavailable(_)
            | AiError::RateLimited { .. }
            | AiError::Timeout(_)
            | AiError::InvalidResponse(_)
            | AiError::Network(_)
            | AiError::Json(_)
            | AiError::Io(_) => ErrorKind::Transient,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(AiError::from_status(429, "", None).kind(), ErrorKind::Transient);
        assert_eq!(AiError::from_status(503, "down", None).kind(), ErrorKind::Transient);
        assert_eq!(AiError::from_status(500, "oops", None).kind(), ErrorKind::Transient);
        assert_eq!(AiError::from_status(408, "", None).kind(), ErrorKind::Transient);
        assert_eq!(AiError::from_status(415, "codec", None).kind(), ErrorKind::Permanent);
        assert_eq!(AiError::from_status(422, "bad", None).kind(), ErrorKind::Permanent);
        assert_eq!(AiError::from_status(404, "", None).kind(), ErrorKind::Permanent);
    }

    #[test]
    fn test_missing_file_is_permanent() {
        let err = AiError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert_eq!(err.kind(), ErrorKind::Permanent);
        let err = AiError::Io(std::io::Error::new(std::io::ErrorKind::Interrupted, "eintr"));
        assert!(err.is_retryable());
    }
}
