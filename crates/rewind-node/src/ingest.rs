//! Parsing of raw ingestion bodies
//!
//! A body is a JSON array of envelopes for one session. A malformed element
//! is dropped on its own; a body that is not an array fails as a whole.

use rewind_core::{EnvelopeError, EventEnvelope, SessionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Result of ingesting one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReceipt {
    /// Envelopes handed to the queue
    pub accepted: usize,
    /// Malformed envelopes dropped before queueing
    pub dropped: usize,
}

/// Envelopes that survived parsing and validation
#[derive(Debug, Default)]
pub(crate) struct ParsedBatch {
    pub envelopes: Vec<EventEnvelope>,
    pub dropped: usize,
}

/// One line of a JSONL ingestion file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestLine {
    pub session_id: SessionId,
    pub events: Value,
}

/// Parse a raw body, dropping elements that are not valid envelopes for
/// `session_id`
pub(crate) fn parse_batch(session_id: &SessionId, raw_json: &str) -> Result<ParsedBatch, EnvelopeError> {
    if session_id.is_empty() {
        return Err(EnvelopeError::EmptySessionId);
    }
    let body: Value = serde_json::from_str(raw_json)?;
    parse_value(session_id, body)
}

pub(crate) fn parse_value(session_id: &SessionId, body: Value) -> Result<ParsedBatch, EnvelopeError> {
    let Value::Array(elements) = body else {
        return Err(EnvelopeError::Decode("expected a JSON array of envelopes".into()));
    };
    Ok(validate(
        session_id,
        elements
            .into_iter()
            .map(|element| serde_json::from_value(element).map_err(EnvelopeError::from)),
    ))
}

/// Keep the envelopes valid for `session_id`
pub(crate) fn validate(
    session_id: &SessionId,
    candidates: impl IntoIterator<Item = Result<EventEnvelope, EnvelopeError>>,
) -> ParsedBatch {
    let mut batch = ParsedBatch::default();
    for (index, candidate) in candidates.into_iter().enumerate() {
        let checked =
            candidate.and_then(|envelope| envelope.validate_for(session_id).map(|()| envelope));
        match checked {
            Ok(envelope) => batch.envelopes.push(envelope),
            Err(e) => {
                warn!(session = %session_id, index, error = %e, "Dropping malformed envelope");
                batch.dropped += 1;
            }
        }
    }
    batch
}
