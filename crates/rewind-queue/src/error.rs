//! Error types for rewind-queue

use std::time::Duration;

use rewind_core::PipelineError;
use thiserror::Error;

use crate::message::Topic;

/// Errors raised by the ingestion queue
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue has been shut down
    #[error("Queue is closed")]
    Closed,

    /// No partition capacity became available in time
    #[error("Timed out after {waited:?} waiting for capacity on {topic} partition {partition}")]
    Timeout {
        topic: Topic,
        partition: usize,
        waited: Duration,
    },

    /// A single message is larger than the configured limit
    #[error("Message too large (size: {size}, max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A batch has more messages than a partition can ever hold
    #[error("Batch of {count} messages exceeds partition capacity {capacity}")]
    BatchTooLarge { count: usize, capacity: usize },

    /// A message could not be encoded for size checking
    #[error("Failed to encode message: {0}")]
    Encode(String),

    /// A health check message was not acknowledged
    #[error("Health check failed on {topic}: {reason}")]
    HealthCheck { topic: Topic, reason: String },
}

impl QueueError {
    /// Whether retrying the submission later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::HealthCheck { .. })
    }
}

impl From<QueueError> for PipelineError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::PayloadTooLarge { size, max } => PipelineError::PayloadTooLarge { size, max },
            QueueError::BatchTooLarge { count, capacity } => PipelineError::PayloadTooLarge {
                size: count,
                max: capacity,
            },
            QueueError::Encode(reason) => PipelineError::Internal(reason),
            other @ (QueueError::Closed
            | QueueError::Timeout { .. }
            | QueueError::HealthCheck { .. }) => PipelineError::QueueUnavailable(other.to_string()),
        }
    }
}

/// Error returned by a [`MessageHandler`](crate::MessageHandler)
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// The delivery may succeed if retried
    #[error("{0}")]
    Transient(String),

    /// Retrying cannot succeed; the delivery is dead-lettered immediately
    #[error("{0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;
