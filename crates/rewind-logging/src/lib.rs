//! Structured logging for Rewind
//!
//! Installs the `tracing` subscriber used by the `rewind` binary and tests.
//! Console output goes to stderr so command output on stdout stays clean.
//!
//! - JSON lines on the console by default, pretty output for development
//! - Optional JSONL files with rotation and retention
//! - Per-component levels (`[log.components]`)
//! - Session spans naming the session, role and component instance
//!
//! ```ignore
//! use rewind_logging::{LogConfig, RewindSubscriberBuilder};
//!
//! let _guard = RewindSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .with_component("rewind_queue", "trace")
//!     .init();
//! ```

pub mod config;
pub mod context;

pub use config::{
    COMPONENTS, ConsoleConfig, ConsoleFormat, FileConfig, JsonFields, LogConfig, RotationStrategy,
};
pub use context::{SessionContext, SessionRole};

use std::fs::{self, File};

use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Errors raised while installing the subscriber
#[derive(Debug, Error)]
pub enum LogInitError {
    #[error("failed to open log file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to set up log rotation: {0}")]
    Rotation(#[from] InitError),

    #[error("a global subscriber is already installed: {0}")]
    AlreadyInitialized(String),
}

/// Builds and installs the global subscriber from a [`LogConfig`]
#[derive(Debug, Default)]
pub struct RewindSubscriberBuilder {
    config: LogConfig,
}

impl RewindSubscriberBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Base level for targets without an override
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    /// Level for one component, e.g. `rewind_storage`
    pub fn with_component(mut self, target: impl Into<String>, level: impl Into<String>) -> Self {
        self.config = self.config.with_component(target, level);
        self
    }

    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    pub fn with_console_format(mut self, format: ConsoleFormat) -> Self {
        self.config.console.format = format;
        self
    }

    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    /// Install the subscriber, reporting failures on stderr
    ///
    /// The returned guard flushes file output when dropped; keep it alive
    /// for the life of the program.
    pub fn init(self) -> Option<WorkerGuard> {
        match self.try_init() {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("Warning: failed to initialize logging: {e}");
                None
            }
        }
    }

    pub fn try_init(self) -> Result<Option<WorkerGuard>, LogInitError> {
        // RUST_LOG wins over the configured levels
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.config.filter_directives()));

        let console = &self.config.console;
        let fields = &self.config.json;

        let pretty_console = (console.enabled && console.format == ConsoleFormat::Pretty).then(|| {
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(console.ansi)
                .with_target(true)
        });

        let json_console = (console.enabled && console.format == ConsoleFormat::Json).then(|| {
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .with_span_list(fields.spans)
                .flatten_event(fields.flatten)
                .with_file(fields.location)
                .with_line_number(fields.location)
        });

        let (file_layer, guard) = match &self.config.file {
            Some(file_config) => {
                let (writer, guard) = file_writer(file_config)?;
                let layer = fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_current_span(true)
                    .with_span_list(fields.spans)
                    .flatten_event(fields.flatten)
                    .with_file(fields.location)
                    .with_line_number(fields.location);
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(pretty_console)
            .with(json_console)
            .with(file_layer)
            .try_init()
            .map_err(|e| LogInitError::AlreadyInitialized(e.to_string()))?;

        Ok(guard)
    }
}

fn file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LogInitError> {
    fs::create_dir_all(&config.directory)?;

    let rotation = match config.rotation {
        RotationStrategy::Never => {
            let path = config.directory.join(format!("{}.jsonl", config.prefix));
            return Ok(tracing_appender::non_blocking(File::create(path)?));
        }
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
    };

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(config.prefix.as_str())
        .filename_suffix("jsonl");
    if let Some(max_files) = config.max_files {
        builder = builder.max_log_files(max_files);
    }
    Ok(tracing_appender::non_blocking(builder.build(&config.directory)?))
}

/// Install the testing subscriber; repeated calls are ignored
pub fn init_testing() {
    let _ = RewindSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_json_console() {
        let builder = RewindSubscriberBuilder::new();
        assert_eq!(builder.config.level, "info");
        assert_eq!(builder.config.console.format, ConsoleFormat::Json);
    }

    #[test]
    fn test_builder_overrides() {
        let builder = RewindSubscriberBuilder::new()
            .with_config(LogConfig::production("/tmp/rewind-logs"))
            .with_level("trace")
            .with_console(true)
            .with_console_format(ConsoleFormat::Pretty)
            .with_component("rewind_queue", "debug");
        assert!(builder.config.console.enabled);
        assert_eq!(builder.config.console.format, ConsoleFormat::Pretty);
        assert!(builder.config.file.is_some());
        assert_eq!(builder.config.filter_directives(), "trace,rewind_queue=debug");
    }

    #[test]
    fn test_never_rotation_creates_single_file() {
        let dir = std::env::temp_dir().join(format!("rewind-log-{}", uuid::Uuid::new_v4()));
        let config = FileConfig {
            rotation: RotationStrategy::Never,
            ..FileConfig::new(&dir)
        };
        let (_writer, guard) = file_writer(&config).unwrap();
        drop(guard);
        assert!(dir.join("rewind.jsonl").exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_init_testing_is_repeatable() {
        init_testing();
        init_testing();
    }
}
