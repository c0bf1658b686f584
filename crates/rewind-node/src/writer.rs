//! Timeline writer: the queue consumer that appends to the store
//!
//! Every delivery is appended to the timeline store; envelopes that become
//! visible are published on the live bus. A `SessionClosed` envelope
//! finalizes its session once it is visible, so nothing before it is lost.

use std::sync::Arc;

use async_trait::async_trait;
use rewind_core::{EventEnvelope, SessionId};
use rewind_live::{LiveBus, LiveUpdate};
use rewind_logging::{SessionContext, SessionRole};
use rewind_queue::{Delivery, HandlerError, MessageHandler, QueueMessage};
use rewind_storage::{StorageError, StorageResult, TimelineStore};
use tracing::{Instrument, debug, info, instrument, warn};

/// Queue handler writing deliveries to a [`TimelineStore`]
pub struct TimelineWriter {
    store: Arc<dyn TimelineStore>,
    bus: Arc<LiveBus>,
    context: SessionContext,
}

impl TimelineWriter {
    pub fn new(store: Arc<dyn TimelineStore>, bus: Arc<LiveBus>) -> Self {
        Self {
            store,
            bus,
            context: SessionContext::new(SessionRole::Ingest),
        }
    }

    #[instrument(skip(self, session_id, envelopes), fields(count = envelopes.len()))]
    async fn write(
        &self,
        session_id: &SessionId,
        envelopes: Vec<EventEnvelope>,
    ) -> Result<(), HandlerError> {
        let sequences: Vec<u64> = envelopes.iter().map(|e| e.sequence).collect();
        let outcome = match self.store.append(session_id, envelopes).await {
            Ok(outcome) => outcome,
            Err(StorageError::SessionFinalized(_)) => {
                return self.late_write(session_id, &sequences).await;
            }
            Err(e @ StorageError::InvalidEnvelope(_)) => {
                return Err(HandlerError::Permanent(e.to_string()));
            }
            Err(e) => return Err(HandlerError::Transient(e.to_string())),
        };

        if !outcome.advanced() {
            return Ok(());
        }

        let closes = outcome.newly_visible.iter().any(EventEnvelope::is_session_closed);
        self.bus
            .publish(session_id, LiveUpdate::Appended(outcome.newly_visible));

        if closes {
            finalize_session(self.store.as_ref(), &self.bus, session_id)
                .await
                .map_err(|e| HandlerError::Transient(e.to_string()))?;
        }
        Ok(())
    }

    /// A write to a finalized session is dropped and acknowledged
    ///
    /// Redeliveries of stored events are expected; anything new is a late
    /// write and only logged, since retrying can never succeed.
    async fn late_write(&self, session_id: &SessionId, sequences: &[u64]) -> Result<(), HandlerError> {
        let meta = self
            .store
            .session(session_id)
            .await
            .map_err(|e| HandlerError::Transient(e.to_string()))?;

        let already_stored = meta
            .last_sequence
            .is_some_and(|last| sequences.iter().all(|seq| *seq <= last));
        if already_stored {
            debug!("Ignoring redelivered batch for finalized session");
        } else {
            warn!(
                last_sequence = ?meta.last_sequence,
                count = sequences.len(),
                "Dropped late write to finalized session"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for TimelineWriter {
    /// Write every message, then report the most retryable failure
    ///
    /// A failing session never keeps the others in the delivery from being
    /// written; redelivery after a transient failure is deduplicated by the
    /// store.
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        let mut failure: Option<HandlerError> = None;
        for message in &delivery.messages {
            let QueueMessage::PushEvents {
                session_id,
                envelopes,
            } = message
            else {
                continue;
            };

            let span = self.context.span(session_id);
            if let Err(e) = self.write(session_id, envelopes.clone()).instrument(span).await {
                failure = match failure {
                    Some(transient @ HandlerError::Transient(_)) => Some(transient),
                    _ => Some(e),
                };
            }
        }
        failure.map_or(Ok(()), Err)
    }
}

/// Finalize a session and tell its live subscribers
///
/// Returns false if the session was already finalized.
pub(crate) async fn finalize_session(
    store: &dyn TimelineStore,
    bus: &LiveBus,
    session_id: &SessionId,
) -> StorageResult<bool> {
    let finalized = store.finalize(session_id).await?;
    if finalized {
        bus.publish(session_id, LiveUpdate::Finalized);
        info!(session = %session_id, "Session finalized");
    }
    Ok(finalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rewind_core::{InteractionKind, SerializedNode};
    use rewind_queue::Topic;
    use rewind_storage::InMemoryTimelineStore;

    fn sid() -> SessionId {
        SessionId::from("S1")
    }

    fn click(seq: u64) -> EventEnvelope {
        EventEnvelope::interaction(sid(), seq, seq as i64 * 100, InteractionKind::Click, 1)
    }

    fn delivery(envelopes: Vec<EventEnvelope>) -> Delivery {
        Delivery {
            topic: Topic::Batched,
            partition: 0,
            attempt: 1,
            messages: vec![QueueMessage::push_events(sid(), envelopes)],
        }
    }

    fn writer() -> (TimelineWriter, Arc<InMemoryTimelineStore>, Arc<LiveBus>) {
        let store = Arc::new(InMemoryTimelineStore::new());
        let bus = Arc::new(LiveBus::default());
        (TimelineWriter::new(store.clone(), bus.clone()), store, bus)
    }

    #[tokio::test]
    async fn test_publishes_newly_visible() {
        let (writer, store, bus) = writer();
        let mut rx = bus.subscribe(&sid());

        writer.handle(&delivery(vec![click(1)])).await.unwrap();
        writer.handle(&delivery(vec![click(0)])).await.unwrap();

        let update = rx.recv().await.unwrap();
        let LiveUpdate::Appended(envelopes) = update else {
            panic!("expected appended update");
        };
        let seqs: Vec<u64> = envelopes.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![0, 1]);
        assert_eq!(store.read_all(&sid()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_session_closed_finalizes_once_visible() {
        let (writer, store, bus) = writer();
        let mut rx = bus.subscribe(&sid());

        let snapshot = EventEnvelope::full_snapshot(
            sid(),
            0,
            0,
            SerializedNode::Document {
                id: 1,
                children: vec![],
            },
        );
        writer
            .handle(&delivery(vec![EventEnvelope::session_closed(sid(), 2, 300)]))
            .await
            .unwrap();
        assert!(store.session(&sid()).await.unwrap().is_live);

        writer.handle(&delivery(vec![snapshot, click(1)])).await.unwrap();
        assert!(!store.session(&sid()).await.unwrap().is_live);

        assert!(matches!(rx.recv().await.unwrap(), LiveUpdate::Appended(_)));
        assert_eq!(rx.recv().await.unwrap(), LiveUpdate::Finalized);
    }

    #[tokio::test]
    async fn test_writes_to_finalized_session_are_acknowledged() {
        let (writer, store, _bus) = writer();
        writer.handle(&delivery(vec![click(0), click(1)])).await.unwrap();
        store.finalize(&sid()).await.unwrap();

        writer.handle(&delivery(vec![click(1)])).await.unwrap();
        writer.handle(&delivery(vec![click(2)])).await.unwrap();
        assert_eq!(store.read_all(&sid()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_late_write_does_not_block_other_sessions() {
        let (writer, store, _bus) = writer();
        writer.handle(&delivery(vec![click(0)])).await.unwrap();
        store.finalize(&sid()).await.unwrap();

        let other = SessionId::from("S2");
        let mixed = Delivery {
            topic: Topic::Batched,
            partition: 0,
            attempt: 1,
            messages: vec![
                QueueMessage::push_events(sid(), vec![click(5)]),
                QueueMessage::push_events(
                    other.clone(),
                    vec![EventEnvelope::session_closed(other.clone(), 0, 0)],
                ),
            ],
        };
        writer.handle(&mixed).await.unwrap();

        assert_eq!(store.read_all(&other).await.unwrap().len(), 1);
        assert_eq!(store.read_all(&sid()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_message_still_writes_the_rest() {
        let (writer, store, _bus) = writer();
        let other = SessionId::from("S2");
        let foreign = EventEnvelope::interaction(other.clone(), 0, 0, InteractionKind::Click, 1);
        let mixed = Delivery {
            topic: Topic::Batched,
            partition: 0,
            attempt: 1,
            messages: vec![
                QueueMessage::push_events(sid(), vec![foreign]),
                QueueMessage::push_events(
                    other.clone(),
                    vec![EventEnvelope::interaction(other.clone(), 0, 0, InteractionKind::Click, 1)],
                ),
            ],
        };

        let err = writer.handle(&mixed).await.unwrap_err();
        assert!(err.is_permanent());
        assert_eq!(store.read_all(&other).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_foreign_envelope_is_permanent_failure() {
        let (writer, _store, _bus) = writer();
        let foreign = EventEnvelope::interaction(SessionId::from("S2"), 0, 0, InteractionKind::Click, 1);
        let err = writer.handle(&delivery(vec![foreign])).await.unwrap_err();
        assert!(err.is_permanent());
    }
}
