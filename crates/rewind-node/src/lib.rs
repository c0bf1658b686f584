//! # Rewind Node
//!
//! The node coordinator of the Rewind session replay pipeline. A
//! [`RewindNode`] owns one of each collaborator and wires them together:
//!
//! ```text
//! ingest ─▶ IngestionQueue ─▶ TimelineWriter ─▶ TimelineStore
//!                                   │                 │
//!                                   ▼                 ▼
//!                                LiveBus ──▶ LiveTail ──▶ Player
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use rewind_node::{NodeConfig, RewindNode};
//!
//! let node = RewindNode::start(NodeConfig::default().with_data_dir("./rewind-data")).await?;
//! let receipt = node.ingest(&session_id, raw_json).await?;
//!
//! let player = node.player();
//! player.load(session_id.clone()).await?;
//! let tail = node.tail(&player, session_id);
//! player.play(None).await?;
//! ```

pub mod config;
pub mod error;
pub mod ingest;
pub mod reaper;
pub mod writer;

pub use config::{NodeConfig, PlayerSettings, QueueSettings};
pub use error::{NodeError, NodeResult};
pub use ingest::{IngestLine, IngestReceipt};
pub use reaper::Reaper;
pub use writer::TimelineWriter;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rewind_core::{EventEnvelope, SessionId, SessionMeta};
use rewind_live::{LiveBus, LiveTail, LiveTailConfig};
use rewind_queue::{IngestionQueue, QueueMessage, QueueStatsSnapshot};
use rewind_replay::Player;
use rewind_storage::{
    InMemoryTimelineStore, PersistentTimelineStore, SessionLogConfig, TimelineStore,
};
use serde_json::Value;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use crate::ingest::ParsedBatch;

/// Coordinator of one ingestion and replay pipeline
pub struct RewindNode {
    config: NodeConfig,
    store: Arc<dyn TimelineStore>,
    bus: Arc<LiveBus>,
    queue: IngestionQueue,
    /// Shutdown signal sender
    shutdown_tx: broadcast::Sender<()>,
    /// Background task handles
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl RewindNode {
    /// Open the configured store and start the node
    ///
    /// Uses a persistent store when `data_dir` is set, an in-memory one
    /// otherwise.
    #[instrument(skip(config), fields(data_dir = ?config.data_dir))]
    pub async fn start(config: NodeConfig) -> NodeResult<Self> {
        let store: Arc<dyn TimelineStore> = match &config.data_dir {
            Some(dir) => {
                let log_config =
                    SessionLogConfig::new(dir).with_sync_on_write(config.sync_on_write);
                Arc::new(PersistentTimelineStore::with_config(log_config).await?)
            }
            None => Arc::new(InMemoryTimelineStore::new()),
        };
        Self::with_store(config, store).await
    }

    /// Start the node on an existing store
    ///
    /// Starts the queue consumers and runs the queue health check; a failed
    /// health check stops everything and returns [`NodeError::Unhealthy`].
    pub async fn with_store(config: NodeConfig, store: Arc<dyn TimelineStore>) -> NodeResult<Self> {
        let bus = Arc::new(LiveBus::new(config.bus_capacity));
        let writer = Arc::new(TimelineWriter::new(Arc::clone(&store), Arc::clone(&bus)));
        let queue = IngestionQueue::start(config.queue_config(), writer);

        if let Err(e) = queue.health_check().await {
            error!(error = %e, "Startup health check failed");
            queue.shutdown().await;
            return Err(NodeError::Unhealthy(e.to_string()));
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        let mut background_tasks = Vec::new();
        if let Some(timeout) = config.session_timeout() {
            let reaper = Reaper::new(Arc::clone(&store), Arc::clone(&bus), timeout);
            background_tasks.push(reaper.spawn(config.reaper_interval(), shutdown_tx.subscribe()));
        }

        info!(
            persistent = config.data_dir.is_some(),
            reaper = config.session_timeout().is_some(),
            "Node started"
        );

        Ok(Self {
            config,
            store,
            bus,
            queue,
            shutdown_tx,
            background_tasks: Mutex::new(background_tasks),
            stopped: AtomicBool::new(false),
        })
    }

    /// Ingest a raw JSON array of envelopes for one session
    ///
    /// Elements that fail to decode or belong to another session are
    /// dropped and counted; the rest are queued as one message.
    ///
    /// # Errors
    ///
    /// - `MalformedBatch` if the body is not a JSON array or the session id
    ///   is empty
    /// - `Queue` if the queue cannot take the message (`PayloadTooLarge`,
    ///   `Timeout`, `Closed`)
    #[instrument(skip(self, raw_json), fields(session = %session_id, bytes = raw_json.len()))]
    pub async fn ingest(&self, session_id: &SessionId, raw_json: &str) -> NodeResult<IngestReceipt> {
        let batch = ingest::parse_batch(session_id, raw_json)?;
        self.submit(session_id, batch).await
    }

    /// Ingest an already parsed JSON array of envelopes
    pub async fn ingest_value(&self, session_id: &SessionId, body: Value) -> NodeResult<IngestReceipt> {
        if session_id.is_empty() {
            return Err(NodeError::MalformedBatch(rewind_core::EnvelopeError::EmptySessionId));
        }
        let batch = ingest::parse_value(session_id, body)?;
        self.submit(session_id, batch).await
    }

    /// Ingest typed envelopes; those for other sessions are dropped
    pub async fn ingest_envelopes(
        &self,
        session_id: &SessionId,
        envelopes: Vec<EventEnvelope>,
    ) -> NodeResult<IngestReceipt> {
        let batch = ingest::validate(session_id, envelopes.into_iter().map(Ok));
        self.submit(session_id, batch).await
    }

    async fn submit(&self, session_id: &SessionId, batch: ParsedBatch) -> NodeResult<IngestReceipt> {
        if self.is_stopped() {
            return Err(NodeError::Stopped);
        }

        let receipt = IngestReceipt {
            accepted: batch.envelopes.len(),
            dropped: batch.dropped,
        };
        if batch.envelopes.is_empty() {
            return Ok(receipt);
        }

        let message = QueueMessage::push_events(session_id.clone(), batch.envelopes);
        self.queue.submit(message, session_id.as_str()).await?;
        debug!(accepted = receipt.accepted, dropped = receipt.dropped, "Batch queued");
        Ok(receipt)
    }

    /// Run the queue health check
    pub async fn health_check(&self) -> NodeResult<()> {
        Ok(self.queue.health_check().await?)
    }

    /// Spawn a player reading from this node's store
    pub fn player(&self) -> Player {
        Player::spawn(Arc::clone(&self.store), self.config.player_config())
    }

    /// Tail a live session into `player`
    pub fn tail(&self, player: &Player, session_id: SessionId) -> LiveTail {
        LiveTail::spawn(
            Arc::clone(&self.store),
            Arc::clone(&self.bus),
            player.clone(),
            session_id,
            LiveTailConfig::default(),
        )
    }

    /// Finalize a session by hand
    pub async fn finalize_session(&self, session_id: &SessionId) -> NodeResult<bool> {
        Ok(writer::finalize_session(self.store.as_ref(), &self.bus, session_id).await?)
    }

    /// Summaries of all stored sessions
    pub async fn sessions(&self) -> NodeResult<Vec<SessionMeta>> {
        Ok(self.store.sessions().await?)
    }

    /// The timeline store
    pub fn store(&self) -> Arc<dyn TimelineStore> {
        Arc::clone(&self.store)
    }

    /// The live update bus
    pub fn bus(&self) -> Arc<LiveBus> {
        Arc::clone(&self.bus)
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Queue counters
    pub fn queue_stats(&self) -> QueueStatsSnapshot {
        self.queue.stats()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Stop the node
    ///
    /// Drains the queue into the store, then stops background tasks.
    /// Idempotent.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        self.queue.shutdown().await;
        let _ = self.shutdown_tx.send(());

        let mut tasks = self.background_tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }

        info!("Node stopped");
    }
}
