//! Queue configuration

use std::time::Duration;

use crate::message::Topic;

/// Default size limit of one encoded message (1 MiB)
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Configuration for the batched topic
#[derive(Debug, Clone)]
pub struct TopicConfig {
    /// Most messages handed to the handler at once
    pub batch_size: usize,
    /// Longest time a partial batch waits for more messages
    pub flush_interval: Duration,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_millis(250),
        }
    }
}

/// Configuration for the ingestion queue
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Partitions per topic; each has exactly one consumer
    pub partitions: usize,
    /// Bounded capacity of each partition channel
    pub partition_capacity: usize,
    /// Largest accepted encoded message
    pub max_message_bytes: usize,
    /// How long a submit waits for capacity before failing
    pub submit_timeout: Duration,
    /// Handler attempts before a delivery is dead-lettered
    pub max_delivery_attempts: u32,
    /// Backoff after the first failed attempt; doubles on each retry
    pub retry_base: Duration,
    /// Upper bound on the retry backoff
    pub retry_max: Duration,
    /// Topic used by `submit` and `submit_batch`
    pub default_topic: Topic,
    /// Batching of the batched topic
    pub batched: TopicConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            partitions: 4,
            partition_capacity: 1024,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            submit_timeout: Duration::from_secs(5),
            max_delivery_attempts: 5,
            retry_base: Duration::from_millis(100),
            retry_max: Duration::from_secs(10),
            default_topic: Topic::Batched,
            batched: TopicConfig::default(),
        }
    }
}

impl QueueConfig {
    /// Config suited to tests: small and fast
    pub fn testing() -> Self {
        Self {
            partitions: 2,
            partition_capacity: 64,
            submit_timeout: Duration::from_millis(200),
            max_delivery_attempts: 3,
            retry_base: Duration::from_millis(5),
            retry_max: Duration::from_millis(50),
            batched: TopicConfig {
                batch_size: 10,
                flush_interval: Duration::from_millis(20),
            },
            ..Default::default()
        }
    }

    /// Set the number of partitions per topic
    pub fn with_partitions(mut self, partitions: usize) -> Self {
        self.partitions = partitions.max(1);
        self
    }

    /// Set the capacity of each partition channel
    pub fn with_partition_capacity(mut self, capacity: usize) -> Self {
        self.partition_capacity = capacity.max(1);
        self
    }

    /// Set the maximum encoded message size
    pub fn with_max_message_bytes(mut self, max: usize) -> Self {
        self.max_message_bytes = max;
        self
    }

    /// Set the submit timeout
    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }

    /// Set the maximum delivery attempts (at least one)
    pub fn with_max_delivery_attempts(mut self, attempts: u32) -> Self {
        self.max_delivery_attempts = attempts.max(1);
        self
    }

    /// Set the retry backoff bounds
    pub fn with_retry_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.retry_base = base;
        self.retry_max = max.max(base);
        self
    }

    /// Set the default topic
    pub fn with_default_topic(mut self, topic: Topic) -> Self {
        self.default_topic = topic;
        self
    }

    /// Set batching of the batched topic
    pub fn with_batching(mut self, batch_size: usize, flush_interval: Duration) -> Self {
        self.batched = TopicConfig {
            batch_size: batch_size.max(1),
            flush_interval,
        };
        self
    }

    /// Backoff before the retry that follows failed attempt `attempt` (1-based)
    ///
    /// `retry_base * 2^(attempt - 1)`, capped at `retry_max`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.retry_base
            .saturating_mul(2u32.pow(exponent))
            .min(self.retry_max)
    }
}
