//! Logging infrastructure - structured tracing for the bridge
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Configurable level, format and destination
//! - Non-blocking writers so host threads never stall on console output
//! - Daily rolling files when the host has no usable stderr
//!
//! The bridge lives inside a host process that may already own a global
//! subscriber, so installation is always best-effort (`try_init`).

use std::path::Path;
use std::str::FromStr;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

mod events;

pub use events::*;
pub use tracing::{debug, error, info, trace, warn, Level};

/// Guard of the subscriber installed by [`init_bridge_logging`]
static BRIDGE_GUARD: Lazy<Mutex<Option<WorkerGuard>>> = Lazy::new(|| Mutex::new(None));

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format with timestamps
    Pretty,
    /// Compact format for production
    #[default]
    Compact,
    /// JSON format for structured logging
    Json,
}

/// Log output destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    /// File with daily rotation
    File { directory: String, prefix: String },
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Whether to include span enter/exit events
    pub span_events: bool,
    /// Extra filter directives (e.g., "embedbridge=debug,lifecycle=trace")
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Compact,
            output: LogOutput::Stderr,
            span_events: false,
            filter: None,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Build from the `[logging]` section of the bridge configuration.
    ///
    /// An unparsable level falls back to INFO rather than failing init.
    pub fn from_settings(settings: &crate::config::LoggingConfig) -> Self {
        let level = Level::from_str(&settings.level).unwrap_or(Level::INFO);
        let output = match &settings.directory {
            Some(directory) => LogOutput::File {
                directory: directory.clone(),
                prefix: "embedbridge".to_string(),
            },
            None => LogOutput::Stderr,
        };

        Self {
            level,
            format: settings.format,
            output,
            span_events: false,
            filter: settings.filter.clone(),
        }
    }
}

/// Install a global subscriber.
///
/// Returns the `WorkerGuard` of the non-blocking writer; logs are flushed when it
/// drops. Returns `None` if another subscriber was already installed.
pub fn init_logging(config: LogConfig) -> Option<WorkerGuard> {
    let (writer, guard) = match &config.output {
        LogOutput::Stdout => tracing_appender::non_blocking(std::io::stdout()),
        LogOutput::Stderr => tracing_appender::non_blocking(std::io::stderr()),
        LogOutput::File { directory, prefix } => {
            tracing_appender::non_blocking(rolling::daily(directory, prefix))
        }
    };

    if install(writer, &config) {
        Some(guard)
    } else {
        None
    }
}

fn install(writer: NonBlocking, config: &LogConfig) -> bool {
    let filter = build_filter(config);
    let spans = span_events_config(config.span_events);

    let installed = match config.format {
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .with_writer(writer)
                .pretty()
                .with_span_events(spans)
                .with_filter(filter);
            tracing_subscriber::registry().with(layer).try_init()
        }
        LogFormat::Compact => {
            let layer = fmt::layer()
                .with_writer(writer)
                .compact()
                .with_span_events(spans)
                .with_filter(filter);
            tracing_subscriber::registry().with(layer).try_init()
        }
        LogFormat::Json => {
            let layer = fmt::layer()
                .with_writer(writer)
                .json()
                .with_span_events(spans)
                .with_filter(filter);
            tracing_subscriber::registry().with(layer).try_init()
        }
    };

    installed.is_ok()
}

fn build_filter(config: &LogConfig) -> EnvFilter {
    let base_filter = EnvFilter::from_default_env().add_directive(config.level.into());

    match &config.filter {
        Some(filter_str) => filter_str
            .split(',')
            .filter(|directive| !directive.trim().is_empty())
            .fold(base_filter, |filter, directive| {
                filter.add_directive(directive.trim().parse().unwrap_or_else(|_| {
                    warn!("Invalid filter directive: {}", directive);
                    config.level.into()
                }))
            }),
        None => base_filter,
    }
}

fn span_events_config(enabled: bool) -> FmtSpan {
    if enabled {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

/// Initialize logging once for the lifetime of the loaded library.
///
/// Idempotent: later calls are no-ops. The guard is held until
/// [`shutdown_bridge_logging`].
pub fn init_bridge_logging(config: LogConfig) {
    let mut slot = BRIDGE_GUARD.lock();
    if slot.is_some() {
        return;
    }
    *slot = init_logging(config);
}

/// Flush and release the writer installed by [`init_bridge_logging`]
pub fn shutdown_bridge_logging() {
    BRIDGE_GUARD.lock().take();
}

/// Defaults for development: debug level, pretty output with spans
pub fn init_dev_logging() -> Option<WorkerGuard> {
    init_logging(LogConfig {
        level: Level::DEBUG,
        format: LogFormat::Pretty,
        output: LogOutput::Stderr,
        span_events: true,
        filter: Some("embedbridge=debug".to_string()),
    })
}

/// Defaults for shipped builds: JSON files in `log_dir`
pub fn init_prod_logging(log_dir: impl AsRef<Path>) -> Option<WorkerGuard> {
    init_logging(LogConfig {
        level: Level::INFO,
        format: LogFormat::Json,
        output: LogOutput::File {
            directory: log_dir.as_ref().to_string_lossy().to_string(),
            prefix: "embedbridge".to_string(),
        },
        span_events: false,
        filter: Some("embedbridge=info".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoggingConfig;

    #[test]
    fn test_config_builder() {
        let config = LogConfig::new()
            .with_level(Level::DEBUG)
            .with_format(LogFormat::Json)
            .with_span_events(true)
            .with_filter("embedbridge=trace");

        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.span_events);
        assert_eq!(config.filter, Some("embedbridge=trace".to_string()));
    }

    #[test]
    fn test_from_settings() {
        let settings = LoggingConfig {
            level: "warn".to_string(),
            format: LogFormat::Pretty,
            filter: None,
            directory: Some("/tmp/bridge-logs".to_string()),
        };
        let config = LogConfig::from_settings(&settings);

        assert_eq!(config.level, Level::WARN);
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(matches!(config.output, LogOutput::File { ref directory, .. } if directory == "/tmp/bridge-logs"));
    }

    #[test]
    fn test_bad_level_falls_back() {
        let settings = LoggingConfig {
            level: "chatty".to_string(),
            ..LoggingConfig::default()
        };

        assert_eq!(LogConfig::from_settings(&settings).level, Level::INFO);
    }
}
