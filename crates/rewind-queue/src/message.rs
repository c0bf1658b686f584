//! Queue messages, topics and deliveries

use std::fmt;

use rewind_core::{EventEnvelope, SessionId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{QueueError, QueueResult};

/// Topic a message is submitted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Each message is handed to the handler on its own
    Unbatched,
    /// Messages are accumulated into batches before handling
    Batched,
}

impl Topic {
    /// Both topics, in consumer start order
    pub const ALL: [Topic; 2] = [Topic::Unbatched, Topic::Batched];
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Unbatched => write!(f, "unbatched"),
            Topic::Batched => write!(f, "batched"),
        }
    }
}

/// A message travelling through the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueMessage {
    /// Envelopes recorded for a session, in producer order
    PushEvents {
        session_id: SessionId,
        envelopes: Vec<EventEnvelope>,
    },
    /// Liveness probe; acknowledged by consumers without reaching the handler
    HealthCheck { id: Uuid },
}

impl QueueMessage {
    /// Create a push-events message
    pub fn push_events(session_id: SessionId, envelopes: Vec<EventEnvelope>) -> Self {
        Self::PushEvents {
            session_id,
            envelopes,
        }
    }

    /// Create a health check message with a fresh id
    pub fn health_check() -> Self {
        Self::HealthCheck { id: Uuid::new_v4() }
    }

    /// Whether this is a health check
    pub fn is_health_check(&self) -> bool {
        matches!(self, Self::HealthCheck { .. })
    }

    /// Partition key of this message
    pub fn partition_key(&self) -> String {
        match self {
            Self::PushEvents { session_id, .. } => session_id.to_string(),
            Self::HealthCheck { id } => id.to_string(),
        }
    }

    /// Size of the message in its wire encoding
    pub fn encoded_size(&self) -> QueueResult<usize> {
        serde_json::to_vec(self)
            .map(|bytes| bytes.len())
            .map_err(|e| QueueError::Encode(e.to_string()))
    }
}

/// One handler invocation: a batch of messages from one partition
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Topic the messages were consumed from
    pub topic: Topic,
    /// Partition the messages were consumed from
    pub partition: usize,
    /// 1 for the first attempt, incremented on each redelivery
    pub attempt: u32,
    /// Messages in submission order
    pub messages: Vec<QueueMessage>,
}

impl Delivery {
    /// Whether this is a redelivery of a failed attempt
    pub fn is_redelivery(&self) -> bool {
        self.attempt > 1
    }

    /// Total number of envelopes carried by the delivery
    pub fn envelope_count(&self) -> usize {
        self.messages
            .iter()
            .map(|m| match m {
                QueueMessage::PushEvents { envelopes, .. } => envelopes.len(),
                QueueMessage::HealthCheck { .. } => 0,
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rewind_core::InteractionKind;

    #[test]
    fn test_push_events_wire_form() {
        let sid = SessionId::from("S1");
        let msg = QueueMessage::push_events(
            sid.clone(),
            vec![EventEnvelope::interaction(sid, 0, 1, InteractionKind::Click, 2)],
        );
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.starts_with(r#"{"type":"push_events","session_id":"S1""#));
        assert_eq!(msg.encoded_size().unwrap(), json.len());
        assert_eq!(msg.partition_key(), "S1");
    }

    #[test]
    fn test_health_check_ids_are_unique() {
        let a = QueueMessage::health_check();
        let b = QueueMessage::health_check();
        assert!(a.is_health_check());
        assert_ne!(a, b);
    }

    #[test]
    fn test_delivery_envelope_count() {
        let sid = SessionId::from("S1");
        let delivery = Delivery {
            topic: Topic::Batched,
            partition: 0,
            attempt: 2,
            messages: vec![
                QueueMessage::push_events(
                    sid.clone(),
                    vec![
                        EventEnvelope::session_closed(sid.clone(), 0, 0),
                        EventEnvelope::session_closed(sid, 1, 0),
                    ],
                ),
                QueueMessage::health_check(),
            ],
        };
        assert_eq!(delivery.envelope_count(), 2);
        assert!(delivery.is_redelivery());
    }
}
