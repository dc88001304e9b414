use super::LoggingError;
use crate::defaults::MAW_LOG_PATH;
use serde::Deserialize;
use std::path::PathBuf;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};

#[derive(Debug, Deserialize, PartialEq, Clone)]
pub(crate) struct FileLoggingConfig {
    #[serde(default)]
    pub(crate) enabled: bool,
    #[serde(default = "default_log_path")]
    pub(crate) path: LogFilePath,
}

impl Default for FileLoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_log_path(),
        }
    }
}

fn default_log_path() -> LogFilePath {
    LogFilePath {
        parent: PathBuf::from(MAW_LOG_PATH)
            .parent()
            .map(PathBuf::from)
            .unwrap_or_default(),
        file_name: PathBuf::from("maw.log"),
    }
}

impl FileLoggingConfig {
    pub(super) fn setup(&self) -> Result<Option<(NonBlocking, WorkerGuard)>, LoggingError> {
        if !self.enabled {
            return Ok(None);
        }
        let appender = tracing_appender::rolling::never(&self.path.parent, &self.path.file_name);
        Ok(Some(tracing_appender::non_blocking(appender)))
    }
}

#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(try_from = "PathBuf")]
pub(crate) struct LogFilePath {
    parent: PathBuf,
    file_name: PathBuf,
}

impl TryFrom<PathBuf> for LogFilePath {
    type Error = LoggingError;

    fn try_from(value: PathBuf) -> Result<Self, Self::Error> {
        match (value.parent(), value.file_name()) {
            (Some(parent), Some(file_name)) => Ok(Self {
                parent: parent.to_path_buf(),
                file_name: PathBuf::from(file_name),
            }),
            _ => Err(LoggingError::InvalidFilePath(value.display().to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_log_file_path_is_split() {
        let path = LogFilePath::try_from(PathBuf::from("/var/log/maw/maw.log")).unwrap();
        assert_eq!(path.parent, PathBuf::from("/var/log/maw"));
        assert_eq!(path.file_name, PathBuf::from("maw.log"));
        assert_eq!(path, default_log_path());
    }

    #[test]
    fn test_root_is_not_a_log_file() {
        assert_matches!(
            LogFilePath::try_from(PathBuf::from("/")),
            Err(LoggingError::InvalidFilePath(_))
        );
    }

    #[test]
    fn test_disabled_file_logging_sets_nothing_up() {
        assert!(FileLoggingConfig::default().setup().unwrap().is_none());
    }
}
