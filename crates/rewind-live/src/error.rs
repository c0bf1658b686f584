//! Error types for rewind-live

use rewind_core::PipelineError;
use rewind_replay::ReplayError;
use rewind_storage::StorageError;
use thiserror::Error;

/// Errors that end a live tail
#[derive(Debug, Error)]
pub enum LiveError {
    /// Catching up from the store failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The player rejected an update
    #[error("Player error: {0}")]
    Replay(#[from] ReplayError),

    /// The tail task panicked or was aborted
    #[error("Tail task failed: {0}")]
    Task(String),
}

impl From<LiveError> for PipelineError {
    fn from(err: LiveError) -> Self {
        match err {
            LiveError::Storage(e) => e.into(),
            LiveError::Replay(e) => e.into(),
            LiveError::Task(reason) => PipelineError::Internal(reason),
        }
    }
}

/// Result type for live tail operations
pub type LiveResult<T> = Result<T, LiveError>;
