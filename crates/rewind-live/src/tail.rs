//! Live tail: keeps an open player in step with a live session
//!
//! The tail subscribes to the session's [`LiveBus`] channel *before*
//! reading the store, so any envelope becomes visible either through the
//! catch-up read or through the subscription. Envelopes are forwarded to
//! the player by sequence; anything at or below the last forwarded
//! sequence is dropped.

use std::sync::Arc;
use std::time::Duration;

use rewind_core::{EventEnvelope, SessionId};
use rewind_replay::{Player, ReplayError};
use rewind_storage::TimelineStore;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::bus::{LiveBus, LiveUpdate};
use crate::error::{LiveError, LiveResult};

/// Configuration for a live tail
#[derive(Debug, Clone)]
pub struct LiveTailConfig {
    /// Maximum envelopes fetched per catch-up read
    pub catch_up_chunk: u64,
    /// Pause before resubscribing after the channel closed unexpectedly
    pub resubscribe_delay: Duration,
}

impl Default for LiveTailConfig {
    fn default() -> Self {
        Self {
            catch_up_chunk: 1_000,
            resubscribe_delay: Duration::from_millis(100),
        }
    }
}

impl LiveTailConfig {
    pub fn with_catch_up_chunk(mut self, chunk: u64) -> Self {
        self.catch_up_chunk = chunk.max(1);
        self
    }

    pub fn with_resubscribe_delay(mut self, delay: Duration) -> Self {
        self.resubscribe_delay = delay;
        self
    }
}

/// Why a tail stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailExit {
    /// The session was finalized and the player told so
    Finalized,
    /// [`LiveTail::stop`] was called
    Stopped,
    /// The player task has closed
    PlayerClosed,
}

/// Handle to a running live tail
#[derive(Debug)]
pub struct LiveTail {
    session_id: SessionId,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<LiveResult<TailExit>>,
}

impl LiveTail {
    /// Start tailing `session_id` into `player`
    ///
    /// The player should already have `session_id` loaded. Forwarding
    /// resumes after the events it holds, or from sequence 0 if it holds
    /// another session.
    pub fn spawn(
        store: Arc<dyn TimelineStore>,
        bus: Arc<LiveBus>,
        player: Player,
        session_id: SessionId,
        config: LiveTailConfig,
    ) -> Self {
        let snapshot = player.snapshot();
        let next_sequence = if snapshot.session.as_ref() == Some(&session_id) {
            snapshot.event_count as u64
        } else {
            0
        };

        let (stop, stop_rx) = oneshot::channel();
        let task = TailTask {
            store,
            bus,
            player,
            session_id: session_id.clone(),
            config,
            next_sequence,
            stop: stop_rx,
        };

        Self {
            session_id,
            stop: Some(stop),
            task: tokio::spawn(task.run()),
        }
    }

    /// Session being tailed
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Whether the tail has stopped on its own
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop tailing and release the subscription
    pub async fn stop(mut self) -> LiveResult<TailExit> {
        if let Some(stop) = self.stop.take() {
            // Already finished if the receiver is gone
            let _ = stop.send(());
        }
        self.join().await
    }

    /// Wait for the tail to stop on its own
    pub async fn join(self) -> LiveResult<TailExit> {
        self.task
            .await
            .map_err(|e| LiveError::Task(e.to_string()))?
    }
}

struct TailTask {
    store: Arc<dyn TimelineStore>,
    bus: Arc<LiveBus>,
    player: Player,
    session_id: SessionId,
    config: LiveTailConfig,
    /// First sequence not yet forwarded
    next_sequence: u64,
    stop: oneshot::Receiver<()>,
}

impl TailTask {
    #[instrument(skip(self), fields(session = %self.session_id))]
    async fn run(mut self) -> LiveResult<TailExit> {
        info!(from = self.next_sequence, "Live tail started");
        let result = self.tail().await;
        self.bus.release(&self.session_id);
        match &result {
            Ok(exit) => info!(?exit, forwarded_to = self.next_sequence, "Live tail stopped"),
            Err(e) => warn!(error = %e, "Live tail failed"),
        }
        result
    }

    async fn tail(&mut self) -> LiveResult<TailExit> {
        let mut updates = self.bus.subscribe(&self.session_id);
        let step = self.catch_up().await;
        if let Some(exit) = self.guard(step)? {
            return Ok(exit);
        }

        let player = self.player.clone();
        loop {
            tokio::select! {
                biased;
                _ = &mut self.stop => return Ok(TailExit::Stopped),
                _ = player.closed() => return Ok(TailExit::PlayerClosed),
                update = updates.recv() => {
                    let step = match update {
                        Ok(LiveUpdate::Appended(envelopes)) => self.forward_update(envelopes).await,
                        Ok(LiveUpdate::Finalized) => self.finish().await.map(Some),
                        Err(RecvError::Lagged(missed)) => {
                            warn!(missed, "Live subscription lagged, resuming from store");
                            updates = self.bus.subscribe(&self.session_id);
                            self.catch_up().await
                        }
                        Err(RecvError::Closed) => {
                            debug!("Live channel closed, resubscribing");
                            tokio::time::sleep(self.config.resubscribe_delay).await;
                            updates = self.bus.subscribe(&self.session_id);
                            self.catch_up().await
                        }
                    };
                    if let Some(exit) = self.guard(step)? {
                        return Ok(exit);
                    }
                }
            }
        }
    }

    /// Turn a closed player into a clean exit
    fn guard(&self, step: LiveResult<Option<TailExit>>) -> LiveResult<Option<TailExit>> {
        match step {
            Err(LiveError::Replay(ReplayError::Closed)) => Ok(Some(TailExit::PlayerClosed)),
            other => other,
        }
    }

    /// Forward everything visible in the store after `next_sequence`
    ///
    /// Returns `Finalized` once the session is finalized and fully read.
    async fn catch_up(&mut self) -> LiveResult<Option<TailExit>> {
        // Metadata first: once finalized, the read below sees the final prefix
        let meta = self.store.session(&self.session_id).await?;
        loop {
            let from = self.next_sequence;
            let batch = self
                .store
                .read(&self.session_id, from, Some(from + self.config.catch_up_chunk))
                .await?;
            let complete = (batch.len() as u64) < self.config.catch_up_chunk;
            if !batch.is_empty() {
                debug!(from, count = batch.len(), "Caught up from store");
                self.forward(batch).await?;
            }
            if complete {
                break;
            }
        }

        if meta.is_live {
            Ok(None)
        } else {
            self.player.finalize().await?;
            Ok(Some(TailExit::Finalized))
        }
    }

    async fn forward_update(
        &mut self,
        envelopes: Vec<EventEnvelope>,
    ) -> LiveResult<Option<TailExit>> {
        match envelopes.iter().map(|e| e.sequence).min() {
            Some(first) if first > self.next_sequence => {
                debug!(expected = self.next_sequence, got = first, "Gap in live updates");
                self.catch_up().await
            }
            _ => {
                self.forward(envelopes).await?;
                Ok(None)
            }
        }
    }

    async fn finish(&mut self) -> LiveResult<TailExit> {
        // Picks up anything published before the finalization but not yet seen
        if let Some(exit) = self.catch_up().await? {
            return Ok(exit);
        }
        self.player.finalize().await?;
        Ok(TailExit::Finalized)
    }

    async fn forward(&mut self, mut envelopes: Vec<EventEnvelope>) -> LiveResult<()> {
        envelopes.retain(|e| e.sequence >= self.next_sequence);
        envelopes.sort_by_key(|e| e.sequence);
        envelopes.dedup_by_key(|e| e.sequence);
        let Some(last) = envelopes.last().map(|e| e.sequence) else {
            return Ok(());
        };

        let count = envelopes.len();
        self.player.append(envelopes).await?;
        self.next_sequence = last + 1;
        debug!(count, next = self.next_sequence, "Forwarded to player");
        Ok(())
    }
}
