//! Log output of maw, always to standard error so the standard output stays owned by the
//! package manager commands maw passes through.
pub mod file_logging;
pub mod format;

use crate::defaults::MAW_LOG_ENV_VAR;
use file_logging::FileLoggingConfig;
use format::LoggingFormat;
use serde::Deserialize;
use std::str::FromStr;
use thiserror::Error;
use tracing::{Level, debug};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::PrettyFields;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("init logging error: `{0}`")]
    TryInitError(String),
    #[error("invalid logging file path: `{0}`")]
    InvalidFilePath(String),
    #[error("invalid logging directive: `{0}`")]
    InvalidDirective(String),
}

/// Keeps the file writer flushing while alive. Must be held until the process exits.
pub type FileLoggerGuard = Option<WorkerGuard>;

#[derive(Debug, Deserialize, PartialEq, Clone, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub(crate) format: LoggingFormat,
    #[serde(default)]
    pub(crate) level: LogLevel,
    #[serde(default)]
    pub(crate) file: FileLoggingConfig,
}

impl LoggingConfig {
    /// Installs the global subscriber: standard error, plus the log file when enabled.
    pub fn try_init(&self) -> Result<FileLoggerGuard, LoggingError> {
        let target = self.format.target;
        let timestamp_fmt = self.format.timestamp.0.clone();

        let (file_layer, guard) = match self.file.setup()? {
            Some((file_writer, guard)) => {
                let layer = tracing_subscriber::fmt::layer()
                    .with_writer(file_writer)
                    .with_ansi(false)
                    .with_target(target)
                    .with_timer(ChronoLocal::new(timestamp_fmt.clone()))
                    .fmt_fields(PrettyFields::new())
                    .with_filter(self.filter()?);
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        let console_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(target)
            .with_timer(ChronoLocal::new(timestamp_fmt))
            .fmt_fields(PrettyFields::new())
            .with_filter(self.filter()?);

        tracing_subscriber::Registry::default()
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .map_err(|_| {
                LoggingError::TryInitError("unable to set the global logging subscriber".into())
            })?;

        debug!("Logging initialized");
        Ok(guard)
    }

    /// Messages of maw itself at the configured level, unless the level env var overrides it.
    fn filter(&self) -> Result<EnvFilter, LoggingError> {
        let directive = format!("maw={}", self.level.as_str())
            .parse::<Directive>()
            .map_err(|err| LoggingError::InvalidDirective(err.to_string()))?;

        Ok(EnvFilter::builder()
            .with_default_directive(directive)
            .with_env_var(MAW_LOG_ENV_VAR)
            .from_env_lossy())
    }
}

#[derive(Debug, PartialEq, Clone)]
pub(crate) struct LogLevel(Level);

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self.0 {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self(Level::INFO)
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value_str = String::deserialize(deserializer)?;
        Level::from_str(&value_str)
            .map(LogLevel)
            .map_err(serde::de::Error::custom)
    }
}
