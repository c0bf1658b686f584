//! Error types for rewind-replay

use rewind_core::{PipelineError, SessionId};
use rewind_storage::StorageError;
use thiserror::Error;

use crate::engine::PlayerState;

/// Errors raised by the replay engine and player
#[derive(Debug, Error)]
pub enum ReplayError {
    /// The command needs a loaded timeline
    #[error("No session loaded (state: {0})")]
    NotLoaded(PlayerState),

    /// Playback speed must be a positive, finite number
    #[error("Invalid playback speed: {0}")]
    InvalidSpeed(f64),

    /// Loading the session from the store failed
    #[error("Failed to load session {session}: {source}")]
    Load {
        session: SessionId,
        #[source]
        source: StorageError,
    },

    /// The player task has stopped
    #[error("Player is closed")]
    Closed,
}

impl From<ReplayError> for PipelineError {
    fn from(err: ReplayError) -> Self {
        match err {
            ReplayError::Load { source, .. } => source.into(),
            other => PipelineError::Internal(other.to_string()),
        }
    }
}

/// Result type for replay operations
pub type ReplayResult<T> = Result<T, ReplayError>;
