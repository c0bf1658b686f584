//! Per-session broadcast of newly visible events

use dashmap::DashMap;
use rewind_core::{EventEnvelope, SessionId};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Default capacity of each session channel
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Change to a live session
#[derive(Debug, Clone, PartialEq)]
pub enum LiveUpdate {
    /// Envelopes that just joined the visible prefix, in sequence order
    Appended(Vec<EventEnvelope>),
    /// The session no longer accepts events
    Finalized,
}

/// Fan-out of live updates, one broadcast channel per session
///
/// Channels are created on first subscription and dropped once a session
/// is finalized or nobody listens any more.
#[derive(Debug)]
pub struct LiveBus {
    channels: DashMap<SessionId, broadcast::Sender<LiveUpdate>>,
    capacity: usize,
}

impl Default for LiveBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl LiveBus {
    /// Create a bus whose session channels hold `capacity` updates
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Receive updates for `session_id` published from now on
    pub fn subscribe(&self, session_id: &SessionId) -> broadcast::Receiver<LiveUpdate> {
        self.channels
            .entry(session_id.clone())
            .or_insert_with(|| {
                debug!(session = %session_id, "Opening live channel");
                broadcast::channel(self.capacity).0
            })
            .subscribe()
    }

    /// Publish an update; returns the number of subscribers reached
    pub fn publish(&self, session_id: &SessionId, update: LiveUpdate) -> usize {
        let Some(sender) = self.channels.get(session_id).map(|s| s.value().clone()) else {
            trace!(session = %session_id, "No live subscribers");
            return 0;
        };

        let finalized = update == LiveUpdate::Finalized;
        let reached = sender.send(update).unwrap_or(0);

        if finalized {
            self.channels.remove(session_id);
            debug!(session = %session_id, reached, "Closed live channel");
        } else if reached == 0 {
            self.channels
                .remove_if(session_id, |_, sender| sender.receiver_count() == 0);
        }
        reached
    }

    /// Drop the session channel if nobody listens any more
    ///
    /// Subscribers call this after dropping their receiver; a session that
    /// was finalized before the subscription would otherwise keep it.
    pub fn release(&self, session_id: &SessionId) -> bool {
        let removed = self
            .channels
            .remove_if(session_id, |_, sender| sender.receiver_count() == 0)
            .is_some();
        if removed {
            trace!(session = %session_id, "Released live channel");
        }
        removed
    }

    /// Number of receivers currently listening to a session
    pub fn subscriber_count(&self, session_id: &SessionId) -> usize {
        self.channels
            .get(session_id)
            .map_or(0, |sender| sender.receiver_count())
    }

    /// Number of sessions with an open channel
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
