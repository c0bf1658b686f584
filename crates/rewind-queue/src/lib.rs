//! # Rewind Queue
//!
//! Ingestion queue for the Rewind session replay pipeline.
//!
//! Producers submit [`QueueMessage`]s keyed by session id; consumers hand
//! them to a [`MessageHandler`] (normally the timeline writer). The queue
//! decouples bursty recorders from storage.
//!
//! ## Features
//!
//! - **Partitioning**: a stable BLAKE3 hash of the key picks the partition,
//!   so one session is always consumed in order by the same task
//! - **Two topics**: `Unbatched` hands over one message at a time,
//!   `Batched` accumulates up to `batch_size` messages or `flush_interval`
//! - **At-least-once delivery**: failed deliveries are retried with
//!   exponential backoff and dead-lettered after `max_delivery_attempts`
//! - **Backpressure**: bounded partitions; submits fail with `Timeout`
//!   instead of blocking forever
//! - **Health check**: a probe through both topics, acknowledged by the
//!   consumers without reaching the handler
//!
//! ## Example
//!
//! ```rust,ignore
//! use rewind_queue::{IngestionQueue, QueueConfig, QueueMessage};
//!
//! let queue = IngestionQueue::start(QueueConfig::default(), handler);
//! queue.health_check().await?;
//! queue
//!     .submit(QueueMessage::push_events(session_id.clone(), envelopes), session_id.as_str())
//!     .await?;
//! queue.shutdown().await;
//! ```

pub mod config;
mod consumer;
pub mod error;
pub mod message;
pub mod partition;
pub mod queue;
pub mod stats;

// Re-exports
pub use config::{QueueConfig, TopicConfig};
pub use error::{HandlerError, QueueError, QueueResult};
pub use message::{Delivery, QueueMessage, Topic};
pub use partition::partition_for;
pub use queue::IngestionQueue;
pub use stats::{QueueStats, QueueStatsSnapshot};

use async_trait::async_trait;

/// Consumer-side processing of deliveries
///
/// Handlers must be idempotent: after a failure (or a crash between
/// processing and acknowledgement) the same messages are delivered again.
/// Health check messages never reach the handler.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Process one delivery
    ///
    /// Returning `HandlerError::Transient` schedules a redelivery with an
    /// incremented `attempt`; `HandlerError::Permanent` dead-letters the
    /// delivery immediately.
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError>;
}
