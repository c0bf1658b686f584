//! Partition consumers
//!
//! Each partition of each topic is drained by exactly one consumer task, so
//! messages sharing a partition key are handled strictly in submission
//! order. Failed deliveries are retried in place with exponential backoff,
//! which holds back the rest of the partition until the delivery succeeds
//! or is dead-lettered.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::MessageHandler;
use crate::config::QueueConfig;
use crate::message::{Delivery, QueueMessage, Topic};
use crate::stats::QueueStats;

/// A message on its way through a partition channel
#[derive(Debug)]
pub(crate) struct QueueItem {
    pub message: QueueMessage,
    /// Signalled when a consumer picks up a health check
    pub ack: Option<oneshot::Sender<()>>,
}

impl QueueItem {
    pub fn new(message: QueueMessage) -> Self {
        Self { message, ack: None }
    }

    pub fn probe(message: QueueMessage, ack: oneshot::Sender<()>) -> Self {
        Self {
            message,
            ack: Some(ack),
        }
    }
}

/// Consumer of a single partition
pub(crate) struct PartitionConsumer {
    topic: Topic,
    partition: usize,
    rx: mpsc::Receiver<QueueItem>,
    handler: Arc<dyn MessageHandler>,
    config: Arc<QueueConfig>,
    stats: Arc<QueueStats>,
}

impl PartitionConsumer {
    pub fn new(
        topic: Topic,
        partition: usize,
        rx: mpsc::Receiver<QueueItem>,
        handler: Arc<dyn MessageHandler>,
        config: Arc<QueueConfig>,
        stats: Arc<QueueStats>,
    ) -> Self {
        Self {
            topic,
            partition,
            rx,
            handler,
            config,
            stats,
        }
    }

    /// Spawn the consumer as a background task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Drain the partition until every producer is gone
    async fn run(mut self) {
        debug!(topic = %self.topic, partition = self.partition, "Consumer started");

        while let Some(first) = self.rx.recv().await {
            let mut batch = Vec::new();
            self.accept(first, &mut batch);
            if batch.is_empty() {
                continue;
            }
            if self.topic == Topic::Batched {
                self.fill_batch(&mut batch).await;
            }
            self.deliver(batch).await;
        }

        debug!(topic = %self.topic, partition = self.partition, "Consumer stopped");
    }

    /// Acknowledge health checks; queue everything else for delivery
    fn accept(&self, item: QueueItem, batch: &mut Vec<QueueMessage>) {
        if item.message.is_health_check() {
            trace!(topic = %self.topic, partition = self.partition, "Health check acknowledged");
            if let Some(ack) = item.ack {
                let _ = ack.send(());
            }
            return;
        }
        batch.push(item.message);
    }

    /// Accumulate until the batch is full or the flush interval elapses
    async fn fill_batch(&mut self, batch: &mut Vec<QueueMessage>) {
        let deadline = Instant::now() + self.config.batched.flush_interval;
        while batch.len() < self.config.batched.batch_size {
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(item)) => self.accept(item, batch),
                // Closed or flush interval elapsed
                Ok(None) | Err(_) => break,
            }
        }
    }

    /// Hand a batch to the handler, retrying until it succeeds or is dead-lettered
    async fn deliver(&self, messages: Vec<QueueMessage>) {
        let count = messages.len();
        let mut delivery = Delivery {
            topic: self.topic,
            partition: self.partition,
            attempt: 1,
            messages,
        };

        loop {
            match self.handler.handle(&delivery).await {
                Ok(()) => {
                    self.stats.record_delivered(count);
                    if delivery.is_redelivery() {
                        info!(
                            topic = %self.topic,
                            partition = self.partition,
                            attempt = delivery.attempt,
                            "Delivery succeeded after retry"
                        );
                    }
                    return;
                }
                Err(e) if e.is_permanent() || delivery.attempt >= self.config.max_delivery_attempts => {
                    error!(
                        topic = %self.topic,
                        partition = self.partition,
                        attempts = delivery.attempt,
                        messages = count,
                        envelopes = delivery.envelope_count(),
                        error = %e,
                        "Dead-lettering delivery"
                    );
                    self.stats.record_dead_letter(count);
                    return;
                }
                Err(e) => {
                    let backoff = self.config.backoff(delivery.attempt);
                    warn!(
                        topic = %self.topic,
                        partition = self.partition,
                        attempt = delivery.attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Delivery failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    delivery.attempt += 1;
                    self.stats.record_redelivery();
                }
            }
        }
    }
}
