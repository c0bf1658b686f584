//! Configuration for the node coordinator
//!
//! [`NodeConfig`] is what `rewind.toml` deserializes into. Durations are
//! plain millisecond counts so the file stays readable; the typed configs
//! of the queue and the player are derived from it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rewind_core::UsefulEventFilter;
use rewind_logging::LogConfig;
use rewind_queue::{QueueConfig, Topic};
use rewind_replay::PlayerConfig;
use serde::{Deserialize, Serialize};

use crate::error::{NodeError, NodeResult};

/// Ingestion queue settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub partitions: usize,
    pub partition_capacity: usize,
    pub max_message_bytes: usize,
    pub submit_timeout_ms: u64,
    pub max_delivery_attempts: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    /// Topic used by `ingest`
    pub topic: Topic,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

impl From<&QueueConfig> for QueueSettings {
    fn from(config: &QueueConfig) -> Self {
        Self {
            partitions: config.partitions,
            partition_capacity: config.partition_capacity,
            max_message_bytes: config.max_message_bytes,
            submit_timeout_ms: config.submit_timeout.as_millis() as u64,
            max_delivery_attempts: config.max_delivery_attempts,
            retry_base_ms: config.retry_base.as_millis() as u64,
            retry_max_ms: config.retry_max.as_millis() as u64,
            topic: config.default_topic,
            batch_size: config.batched.batch_size,
            flush_interval_ms: config.batched.flush_interval.as_millis() as u64,
        }
    }
}

impl QueueSettings {
    /// Build the queue configuration
    pub fn to_queue_config(&self) -> QueueConfig {
        QueueConfig::default()
            .with_partitions(self.partitions)
            .with_partition_capacity(self.partition_capacity)
            .with_max_message_bytes(self.max_message_bytes)
            .with_submit_timeout(Duration::from_millis(self.submit_timeout_ms))
            .with_max_delivery_attempts(self.max_delivery_attempts)
            .with_retry_backoff(
                Duration::from_millis(self.retry_base_ms),
                Duration::from_millis(self.retry_max_ms),
            )
            .with_default_topic(self.topic)
            .with_batching(
                self.batch_size,
                Duration::from_millis(self.flush_interval_ms),
            )
    }
}

/// Player settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerSettings {
    pub tick_interval_ms: u64,
    pub speed: f64,
    pub skip_inactivity: bool,
    pub min_inactive_gap_ms: u64,
    /// Interaction kinds shown in the activity feed
    pub useful: UsefulEventFilter,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        let config = PlayerConfig::default();
        Self {
            tick_interval_ms: config.tick_interval.as_millis() as u64,
            speed: config.speed,
            skip_inactivity: config.skip_inactivity,
            min_inactive_gap_ms: config.min_inactive_gap.as_millis() as u64,
            useful: config.filter,
        }
    }
}

impl PlayerSettings {
    /// Build the player configuration
    pub fn to_player_config(&self) -> PlayerConfig {
        PlayerConfig::default()
            .with_tick_interval(Duration::from_millis(self.tick_interval_ms))
            .with_speed(self.speed)
            .with_skip_inactivity(self.skip_inactivity)
            .with_min_inactive_gap(Duration::from_millis(self.min_inactive_gap_ms))
            .with_filter(self.useful.clone())
    }
}

/// Configuration for a RewindNode
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Directory of the persistent store; in-memory when unset
    pub data_dir: Option<PathBuf>,
    /// fsync session logs after every write
    pub sync_on_write: bool,
    /// Live sessions idle for longer than this are finalized; 0 disables
    pub session_timeout_ms: u64,
    /// How often idle sessions are looked for
    pub reaper_interval_ms: u64,
    /// Capacity of each live session channel
    pub bus_capacity: usize,
    pub queue: QueueSettings,
    pub player: PlayerSettings,
    pub log: LogConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            sync_on_write: true,
            session_timeout_ms: 30 * 60 * 1000,
            reaper_interval_ms: 60 * 1000,
            bus_capacity: rewind_live::DEFAULT_BUS_CAPACITY,
            queue: QueueSettings::default(),
            player: PlayerSettings::default(),
            log: LogConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Config suited to tests: in-memory, fast queue, reaper disabled
    pub fn testing() -> Self {
        Self {
            session_timeout_ms: 0,
            queue: QueueSettings::from(&QueueConfig::testing()),
            log: LogConfig::testing(),
            ..Default::default()
        }
    }

    /// Parse a TOML document
    pub fn from_toml_str(source: &str) -> NodeResult<Self> {
        toml::from_str(source).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Load a TOML file
    pub async fn load(path: impl AsRef<Path>) -> NodeResult<Self> {
        let path = path.as_ref();
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| NodeError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Use a persistent store in `data_dir`
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    pub fn with_sync_on_write(mut self, sync: bool) -> Self {
        self.sync_on_write = sync;
        self
    }

    /// Set the inactivity timeout after which live sessions are finalized
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_queue(mut self, queue: QueueSettings) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_player(mut self, player: PlayerSettings) -> Self {
        self.player = player;
        self
    }

    pub fn with_log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    /// Inactivity timeout, if the reaper is enabled
    pub fn session_timeout(&self) -> Option<Duration> {
        (self.session_timeout_ms > 0).then(|| Duration::from_millis(self.session_timeout_ms))
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms.max(1))
    }

    pub fn queue_config(&self) -> QueueConfig {
        self.queue.to_queue_config()
    }

    pub fn player_config(&self) -> PlayerConfig {
        self.player.to_player_config()
    }
}
