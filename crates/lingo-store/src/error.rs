//! Persistence gateway error types.

use thiserror::Error;

use lingo_models::ErrorKind;

/// Result type for gateway operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during gateway operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Chunk not found: {0}")]
    NotFound(String),

    /// Constraint violation the datastore will keep rejecting on replay.
    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),
}

impl StoreError {
    pub fn not_found(chunk_id: impl Into<String>) -> Self {
        Self::NotFound(chunk_id.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::IntegrityViolation(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Commit errors are transient unless the store explicitly reports an
    /// integrity violation.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::IntegrityViolation(_) => ErrorKind::Permanent,
            _ => ErrorKind::Transient,
        }
    }

    /// Check if a read can be retried in place.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Conflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_integrity_is_permanent() {
        assert_eq!(StoreError::integrity("dup").kind(), ErrorKind::Permanent);
        assert_eq!(StoreError::unavailable("down").kind(), ErrorKind::Transient);
        assert_eq!(StoreError::WriteFailed("io".into()).kind(), ErrorKind::Transient);
        assert_eq!(StoreError::not_found("c").kind(), ErrorKind::Transient);
    }

    #[test]
    fn test_read_retry_classification() {
        assert!(StoreError::unavailable("down").is_retryable());
        assert!(StoreError::Conflict("x".into()).is_retryable());
        assert!(!StoreError::not_found("c").is_retryable());
    }
}
