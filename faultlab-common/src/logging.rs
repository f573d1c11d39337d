//! Structured logging initialization for faultlab binaries.
//!
//! All components log through `tracing`; this module provides one shared
//! configuration surface driven by environment variables and CLI flags.

use anyhow::Result;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing_subscriber::{
    fmt,
    fmt::writer::{BoxMakeWriter, MakeWriterExt},
    util::SubscriberInitExt,
    EnvFilter,
};

/// Logging output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Compact single-line logs (default).
    #[default]
    Compact,
    /// Human-friendly, pretty-printed logs.
    Pretty,
    /// JSON-formatted logs for machine parsing.
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "compact" => Some(Self::Compact),
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Configuration for logging initialization.
///
/// Environment variables: `FAULTLAB_LOG_LEVEL`, `FAULTLAB_LOG_FORMAT`
/// (compact|pretty|json) and `FAULTLAB_LOG_FILE` (path of a daily-rotated
/// log file). `RUST_LOG` overrides the level filter entirely when set.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Base log level (trace, debug, info, warn, error, off).
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Optional file path for rotating logs.
    pub file_path: Option<PathBuf>,
    /// Write console logs to stderr instead of stdout.
    pub use_stderr: bool,
}

impl LogConfig {
    /// Build a logging configuration from the environment.
    pub fn from_env(default_level: &str) -> Self {
        let level = std::env::var("FAULTLAB_LOG_LEVEL").unwrap_or_else(|_| default_level.to_string());
        let format = std::env::var("FAULTLAB_LOG_FORMAT")
            .ok()
            .and_then(|v| LogFormat::parse(&v))
            .unwrap_or_default();
        let file_path = std::env::var("FAULTLAB_LOG_FILE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        Self {
            level,
            format,
            file_path,
            use_stderr: false,
        }
    }

    /// Override the base log level.
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Write console logs to stderr.
    pub fn with_stderr(mut self) -> Self {
        self.use_stderr = true;
        self
    }

    fn env_filter(&self) -> EnvFilter {
        if std::env::var_os("RUST_LOG").is_some() {
            if let Ok(filter) = EnvFilter::try_from_default_env() {
                return filter;
            }
        }
        EnvFilter::new(&self.level)
    }
}

/// Guards that keep background logging workers alive.
///
/// Must be held for the lifetime of the process when file logging is
/// enabled.
pub struct LoggingGuards {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Initialize tracing-based logging for the current process.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuards> {
    let filter = config.env_filter();

    let console: BoxMakeWriter = if config.use_stderr {
        BoxMakeWriter::new(std::io::stderr)
    } else {
        BoxMakeWriter::new(std::io::stdout)
    };

    let (writer, file_guard) = match config.file_path.as_ref() {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path.file_name().unwrap_or_else(|| OsStr::new("faultlab.log"));
            let appender = tracing_appender::rolling::daily(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(console.and(non_blocking)), Some(guard))
        }
        None => (console, None),
    };

    let builder = fmt::Subscriber::builder()
        .with_writer(writer)
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(file_guard.is_none());

    let init_result = match config.format {
        LogFormat::Compact => builder.compact().finish().try_init(),
        LogFormat::Pretty => builder.pretty().finish().try_init(),
        LogFormat::Json => builder.json().with_ansi(false).finish().try_init(),
    };

    // try_init only fails when a global dispatcher is already set; tests
    // and embedded callers initialize more than once, so keep the first
    // subscriber and carry on.
    if init_result.is_err() {
        tracing::debug!("logging already initialized, keeping existing subscriber");
    }

    Ok(LoggingGuards {
        _file_guard: file_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parsing() {
        assert_eq!(LogFormat::parse("pretty"), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse(" JSON "), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("compact"), Some(LogFormat::Compact));
        assert_eq!(LogFormat::parse("banana"), None);
    }

    #[test]
    fn test_with_level_overrides() {
        let config = LogConfig::from_env("info").with_level("debug");
        assert_eq!(config.level, "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LogConfig {
            level: "info".to_string(),
            ..LogConfig::default()
        };
        init_logging(&config).expect("first init should succeed");
        init_logging(&config).expect("second init should be tolerated");
    }
}
