//! The ingestion queue

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

use crate::MessageHandler;
use crate::config::QueueConfig;
use crate::consumer::{PartitionConsumer, QueueItem};
use crate::error::{QueueError, QueueResult};
use crate::message::{QueueMessage, Topic};
use crate::partition::partition_for;
use crate::stats::{QueueStats, QueueStatsSnapshot};

/// Partition senders of both topics
struct Producers {
    unbatched: Vec<mpsc::Sender<QueueItem>>,
    batched: Vec<mpsc::Sender<QueueItem>>,
}

impl Producers {
    fn topic(&self, topic: Topic) -> &[mpsc::Sender<QueueItem>] {
        match topic {
            Topic::Unbatched => &self.unbatched,
            Topic::Batched => &self.batched,
        }
    }
}

/// Partitioned, bounded ingestion queue with at-least-once delivery
///
/// Two topics (unbatched and batched) each have `partitions` bounded
/// channels. A message's partition is chosen from its key, so all messages
/// of one session are consumed in order by the same consumer task while
/// other sessions proceed in parallel.
pub struct IngestionQueue {
    config: Arc<QueueConfig>,
    producers: RwLock<Option<Producers>>,
    consumers: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<QueueStats>,
}

impl IngestionQueue {
    /// Create the queue and spawn one consumer per partition and topic
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: QueueConfig, handler: Arc<dyn MessageHandler>) -> Self {
        let config = Arc::new(config);
        let stats = Arc::new(QueueStats::default());
        let mut consumers = Vec::with_capacity(config.partitions * Topic::ALL.len());

        let mut spawn_topic = |topic: Topic| {
            (0..config.partitions)
                .map(|partition| {
                    let (tx, rx) = mpsc::channel(config.partition_capacity);
                    let consumer = PartitionConsumer::new(
                        topic,
                        partition,
                        rx,
                        Arc::clone(&handler),
                        Arc::clone(&config),
                        Arc::clone(&stats),
                    );
                    consumers.push(consumer.spawn());
                    tx
                })
                .collect::<Vec<_>>()
        };

        let producers = Producers {
            unbatched: spawn_topic(Topic::Unbatched),
            batched: spawn_topic(Topic::Batched),
        };

        info!(
            partitions = config.partitions,
            capacity = config.partition_capacity,
            batch_size = config.batched.batch_size,
            "Ingestion queue started"
        );

        Self {
            config,
            producers: RwLock::new(Some(producers)),
            consumers: Mutex::new(consumers),
            stats,
        }
    }

    /// Queue configuration
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Current counters
    pub fn stats(&self) -> QueueStatsSnapshot {
        self.stats.snapshot()
    }

    /// Whether `shutdown` has been called
    pub async fn is_closed(&self) -> bool {
        self.producers.read().await.is_none()
    }

    /// Submit one message to the default topic
    pub async fn submit(&self, message: QueueMessage, partition_key: &str) -> QueueResult<()> {
        self.submit_to(self.config.default_topic, message, partition_key)
            .await
    }

    /// Submit one message to a specific topic
    pub async fn submit_to(
        &self,
        topic: Topic,
        message: QueueMessage,
        partition_key: &str,
    ) -> QueueResult<()> {
        self.submit_batch_to(topic, vec![message], partition_key)
            .await
    }

    /// Submit several messages to the default topic as one unit
    pub async fn submit_batch(
        &self,
        messages: Vec<QueueMessage>,
        partition_key: &str,
    ) -> QueueResult<()> {
        self.submit_batch_to(self.config.default_topic, messages, partition_key)
            .await
    }

    /// Submit several messages to a topic as one unit
    ///
    /// Either every message is enqueued, contiguously and in order, or none
    /// is. Size limits are checked before anything is enqueued.
    ///
    /// # Errors
    ///
    /// - `PayloadTooLarge` if any message exceeds `max_message_bytes`
    /// - `BatchTooLarge` if the batch can never fit in a partition
    /// - `Timeout` if capacity does not free up within `submit_timeout`
    /// - `Closed` after shutdown
    pub async fn submit_batch_to(
        &self,
        topic: Topic,
        messages: Vec<QueueMessage>,
        partition_key: &str,
    ) -> QueueResult<()> {
        let items = messages.into_iter().map(QueueItem::new).collect();
        self.enqueue(topic, items, partition_key).await
    }

    #[instrument(skip(self, items), fields(topic = %topic, key = partition_key, count = items.len()))]
    async fn enqueue(
        &self,
        topic: Topic,
        items: Vec<QueueItem>,
        partition_key: &str,
    ) -> QueueResult<()> {
        if items.is_empty() {
            return Ok(());
        }

        for item in &items {
            let size = item.message.encoded_size()?;
            if size > self.config.max_message_bytes {
                warn!(size, max = self.config.max_message_bytes, "Rejecting oversized message");
                return Err(QueueError::PayloadTooLarge {
                    size,
                    max: self.config.max_message_bytes,
                });
            }
        }
        if items.len() > self.config.partition_capacity {
            return Err(QueueError::BatchTooLarge {
                count: items.len(),
                capacity: self.config.partition_capacity,
            });
        }

        let producers = self.producers.read().await;
        let Some(producers) = producers.as_ref() else {
            return Err(QueueError::Closed);
        };

        let partition = partition_for(partition_key, self.config.partitions);
        let sender = &producers.topic(topic)[partition];
        let count = items.len();

        let permits =
            match tokio::time::timeout(self.config.submit_timeout, sender.reserve_many(count)).await
            {
                Ok(Ok(permits)) => permits,
                Ok(Err(_)) => return Err(QueueError::Closed),
                Err(_) => {
                    return Err(QueueError::Timeout {
                        topic,
                        partition,
                        waited: self.config.submit_timeout,
                    });
                }
            };

        for (permit, item) in permits.zip(items) {
            permit.send(item);
        }
        self.stats.record_submitted(count);

        trace!(partition, "Enqueued");
        Ok(())
    }

    /// Verify that both topics accept and consume messages
    ///
    /// Submits a health check message to the unbatched and then the batched
    /// topic and waits for a consumer to acknowledge each one.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> QueueResult<()> {
        for topic in Topic::ALL {
            let (ack_tx, ack_rx) = oneshot::channel();
            let message = QueueMessage::health_check();
            let key = message.partition_key();

            self.enqueue(topic, vec![QueueItem::probe(message, ack_tx)], &key)
                .await
                .map_err(|e| QueueError::HealthCheck {
                    topic,
                    reason: e.to_string(),
                })?;

            match tokio::time::timeout(self.config.submit_timeout, ack_rx).await {
                Ok(Ok(())) => debug!(topic = %topic, "Topic healthy"),
                Ok(Err(_)) => {
                    return Err(QueueError::HealthCheck {
                        topic,
                        reason: "consumer dropped the probe".into(),
                    });
                }
                Err(_) => {
                    return Err(QueueError::HealthCheck {
                        topic,
                        reason: format!(
                            "not acknowledged within {:?}",
                            self.config.submit_timeout
                        ),
                    });
                }
            }
        }

        self.stats.record_health_check();
        info!("Queue health check passed");
        Ok(())
    }

    /// Stop accepting messages, drain the partitions and join the consumers
    ///
    /// Idempotent.
    pub async fn shutdown(&self) {
        let producers = self.producers.write().await.take();
        if producers.is_none() {
            return;
        }
        drop(producers);

        let consumers = std::mem::take(&mut *self.consumers.lock().await);
        for handle in consumers {
            if let Err(e) = handle.await {
                warn!(error = %e, "Consumer task failed");
            }
        }

        let stats = self.stats.snapshot();
        info!(
            submitted = stats.submitted,
            delivered = stats.delivered,
            dead_lettered = stats.dead_lettered,
            "Ingestion queue shut down"
        );
    }
}
