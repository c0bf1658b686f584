//! Logging configuration
//!
//! [`LogConfig`] is the `[log]` table of `rewind.toml`. Every field has a
//! default, so a partial table is enough.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Pipeline components that can be given their own level
pub const COMPONENTS: [&str; 6] = [
    "rewind_queue",
    "rewind_storage",
    "rewind_replay",
    "rewind_live",
    "rewind_node",
    "rewind",
];

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level for everything without an override; `RUST_LOG` takes precedence
    pub level: String,
    /// Per-target levels, e.g. `rewind_queue = "debug"`
    pub components: BTreeMap<String, String>,
    pub console: ConsoleConfig,
    /// JSONL file output; disabled when absent
    pub file: Option<FileConfig>,
    pub json: JsonFields,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            components: BTreeMap::new(),
            console: ConsoleConfig::default(),
            file: None,
            json: JsonFields::default(),
        }
    }
}

impl LogConfig {
    /// Pretty console at debug level
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            console: ConsoleConfig {
                enabled: true,
                format: ConsoleFormat::Pretty,
                ansi: true,
            },
            ..Default::default()
        }
    }

    /// JSONL files under `log_dir`, no console
    pub fn production(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            console: ConsoleConfig {
                enabled: false,
                ..ConsoleConfig::default()
            },
            file: Some(FileConfig::new(log_dir)),
            ..Default::default()
        }
    }

    /// Warnings only, plain console
    pub fn testing() -> Self {
        Self {
            level: "warn".to_string(),
            ..Default::default()
        }
    }

    /// Override the level of one component
    pub fn with_component(mut self, target: impl Into<String>, level: impl Into<String>) -> Self {
        self.components.insert(target.into(), level.into());
        self
    }

    /// `EnvFilter` directives: the base level followed by component overrides
    pub fn filter_directives(&self) -> String {
        let mut directives = vec![self.level.clone()];
        directives.extend(
            self.components
                .iter()
                .map(|(target, level)| format!("{target}={level}")),
        );
        directives.join(",")
    }
}

/// Console output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    pub format: ConsoleFormat,
    /// ANSI colors, pretty format only
    pub ansi: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: ConsoleFormat::Json,
            ansi: false,
        }
    }
}

/// Console line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Human-readable
    Pretty,
}

/// JSONL file output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub directory: PathBuf,
    /// File names are `<prefix>.<date>.jsonl`
    pub prefix: String,
    pub rotation: RotationStrategy,
    /// Rotated files to keep; all when unset
    pub max_files: Option<usize>,
}

impl FileConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Default::default()
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./logs"),
            prefix: "rewind".to_string(),
            rotation: RotationStrategy::Daily,
            max_files: None,
        }
    }
}

/// File rotation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationStrategy {
    #[default]
    Daily,
    Hourly,
    /// Single file, truncated on start
    Never,
}

/// Fields included in JSON lines
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonFields {
    /// Put event fields at the top level instead of under `fields`
    pub flatten: bool,
    /// Include the list of entered spans (carries the session context)
    pub spans: bool,
    /// Include file and line
    pub location: bool,
}

impl Default for JsonFields {
    fn default() -> Self {
        Self {
            flatten: true,
            spans: true,
            location: false,
        }
    }
}
