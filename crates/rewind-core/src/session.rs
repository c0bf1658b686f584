//! Session identifiers and summaries

use std::str::FromStr;

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::error::EnvelopeError;

/// Opaque identifier of a recording session
///
/// Also used as the partition key of the ingestion queue, so all events of
/// one session are processed by the same consumer.
#[derive(
    Debug, Display, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
#[display("{_0}")]
pub struct SessionId(String);

impl SessionId {
    /// Create a session id, rejecting empty identifiers
    pub fn new(id: impl Into<String>) -> Result<Self, EnvelopeError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(EnvelopeError::EmptySessionId);
        }
        Ok(Self(id))
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is blank (only possible for deserialized ids)
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl FromStr for SessionId {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Summary of a stored session
///
/// Only the visible (gap-free) prefix of the session contributes to the
/// timing fields; envelopes waiting behind a gap are counted in `pending`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMeta {
    /// Session identifier
    pub id: SessionId,
    /// Timestamp of the first visible event (ms since epoch)
    pub start_time: Option<i64>,
    /// Timestamp of the last visible event (ms since epoch)
    pub end_time: Option<i64>,
    /// Number of visible events
    pub event_count: usize,
    /// Highest visible sequence number
    pub last_sequence: Option<u64>,
    /// Envelopes received but not yet visible because of a sequence gap
    pub pending: usize,
    /// Whether the session still accepts events
    pub is_live: bool,
    /// Wall-clock time of the last accepted append
    pub last_activity: DateTime<Utc>,
}

impl SessionMeta {
    /// Total duration in milliseconds (last visible minus first visible)
    pub fn total_duration(&self) -> u64 {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) if end > start => (end - start) as u64,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_rejects_empty() {
        assert_eq!(SessionId::new("  "), Err(EnvelopeError::EmptySessionId));
        assert_eq!(SessionId::new("S1").unwrap().as_str(), "S1");
    }

    #[test]
    fn test_session_id_serializes_as_string() {
        let id = SessionId::new("abc").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
        assert_eq!(id.to_string(), "abc");
    }

    #[test]
    fn test_total_duration() {
        let meta = SessionMeta {
            id: SessionId::from("S1"),
            start_time: Some(1_000),
            end_time: Some(11_000),
            event_count: 3,
            last_sequence: Some(2),
            pending: 0,
            is_live: true,
            last_activity: Utc::now(),
        };
        assert_eq!(meta.total_duration(), 10_000);

        let empty = SessionMeta {
            start_time: None,
            end_time: None,
            ..meta
        };
        assert_eq!(empty.total_duration(), 0);
    }
}
