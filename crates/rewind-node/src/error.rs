//! Error types for the node coordinator

use rewind_core::{EnvelopeError, PipelineError};
use rewind_queue::QueueError;
use rewind_replay::ReplayError;
use rewind_storage::StorageError;
use thiserror::Error;

/// Errors that can occur in the node coordinator
#[derive(Debug, Error)]
pub enum NodeError {
    /// Ingestion queue error
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Replay error
    #[error("Replay error: {0}")]
    Replay(#[from] ReplayError),

    /// The ingestion body could not be used at all
    #[error("Malformed batch: {0}")]
    MalformedBatch(#[from] EnvelopeError),

    /// The startup health check failed
    #[error("Node unhealthy: {0}")]
    Unhealthy(String),

    /// The node has been stopped
    #[error("Node stopped")]
    Stopped,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for NodeError {
    fn from(e: std::io::Error) -> Self {
        NodeError::Io(e.to_string())
    }
}

impl From<NodeError> for PipelineError {
    fn from(err: NodeError) -> Self {
        match err {
            NodeError::Queue(e) => e.into(),
            NodeError::Storage(e) => e.into(),
            NodeError::Replay(e) => e.into(),
            NodeError::MalformedBatch(e) => PipelineError::MalformedEnvelope(e),
            NodeError::Stopped => PipelineError::QueueUnavailable("node stopped".into()),
            other => PipelineError::Internal(other.to_string()),
        }
    }
}

/// Result type for node operations
pub type NodeResult<T> = Result<T, NodeError>;
