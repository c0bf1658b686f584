//! Error types for rewind-storage

use rewind_core::{EnvelopeError, PipelineError, SessionId};
use thiserror::Error;

/// Errors that can occur in timeline store operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// No events have been appended for the session
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// The session is finalized and rejects further appends
    #[error("Session finalized: {0}")]
    SessionFinalized(SessionId),

    /// An envelope in the batch does not belong to the session
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(#[from] EnvelopeError),

    /// I/O error during storage operations
    #[error("I/O error: {0}")]
    Io(String),

    /// Error during serialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error during deserialization
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<postcard::Error> for StorageError {
    fn from(err: postcard::Error) -> Self {
        StorageError::Deserialization(err.to_string())
    }
}

impl From<StorageError> for PipelineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::SessionNotFound(id) => PipelineError::SessionNotFound(id),
            StorageError::SessionFinalized(id) => PipelineError::SessionFinalized(id),
            StorageError::InvalidEnvelope(e) => PipelineError::MalformedEnvelope(e),
            other => PipelineError::Internal(other.to_string()),
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
