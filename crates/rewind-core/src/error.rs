//! Error types for the Rewind pipeline

use thiserror::Error;

use crate::session::SessionId;

/// Shared error taxonomy for the pipeline
///
/// Crate-level errors (queue, storage, replay) convert into this type when
/// they cross a component boundary, so producers and the presentation layer
/// can make retry/display decisions without knowing which layer failed.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The ingestion queue could not accept the message (closed, or no
    /// capacity within the submit timeout). Callers may retry with backoff.
    #[error("Ingestion queue unavailable: {0}")]
    QueueUnavailable(String),

    /// A message exceeds the maximum accepted size. Retrying cannot succeed;
    /// the caller must split or drop the payload.
    #[error("Payload too large (size: {size}, max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// No events exist for the session yet
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// The session has been finalized and no longer accepts writes
    #[error("Session finalized: {0}")]
    SessionFinalized(SessionId),

    /// An envelope could not be decoded or violates envelope invariants
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(#[from] EnvelopeError),

    /// A failure outside the taxonomy above (I/O, corrupted storage)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Whether retrying the same operation later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::QueueUnavailable(_))
    }
}

/// Errors describing a single malformed envelope
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("session id is empty")]
    EmptySessionId,

    #[error("envelope belongs to session {actual}, expected {expected}")]
    SessionMismatch {
        expected: SessionId,
        actual: SessionId,
    },

    #[error("negative timestamp: {0}")]
    NegativeTimestamp(i64),

    #[error("failed to decode envelope: {0}")]
    Decode(String),

    #[error("node {0} is not present in the document")]
    UnknownNode(u64),

    #[error("node {0} is already present in the document")]
    DuplicateNode(u64),

    #[error("node {0} cannot have children")]
    NotAContainer(u64),

    #[error("node {0} is not a text node")]
    NotText(u64),

    #[error("node {0} is not an element")]
    NotAnElement(u64),

    #[error("node {id} is not a child of {parent}")]
    NotAChild { parent: u64, id: u64 },
}

impl From<serde_json::Error> for EnvelopeError {
    fn from(err: serde_json::Error) -> Self {
        EnvelopeError::Decode(err.to_string())
    }
}
