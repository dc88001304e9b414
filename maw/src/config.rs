//! # maw configuration
//!
//! Loaded from an optional YAML file, then from `MAW_` prefixed environment variables using a
//! double underscore to reach nested keys, e.g. `MAW_PATHS__SRCDEST=/tmp/src`. Every key has a
//! default, so running without any configuration is valid.
use crate::aur::AurConfig;
use crate::defaults::{BUILDROOT_DIR, MAW_CONFIG_ENV_VAR_PREFIX, PKGDEST_DIR, SRCDEST_DIR};
use crate::http::config::HttpConfig;
use crate::instrumentation::logs::LoggingConfig;
use crate::package::builder::BuildConfig;
use crate::pacman::PacmanConfig;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not load the configuration: {0}")]
    Load(#[from] config::ConfigError),
}

#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct MawConfig {
    #[serde(default)]
    pub log: LoggingConfig,
    /// Runs builds unprivileged and funnels package manager operations through a supervisor.
    #[serde(default = "default_privilege_separation")]
    pub privilege_separation: bool,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub aur: AurConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub pacman: PacmanConfig,
    #[serde(default)]
    pub build: BuildConfig,
}

impl Default for MawConfig {
    fn default() -> Self {
        Self {
            log: LoggingConfig::default(),
            privilege_separation: default_privilege_separation(),
            paths: PathsConfig::default(),
            aur: AurConfig::default(),
            http: HttpConfig::default(),
            pacman: PacmanConfig::default(),
            build: BuildConfig::default(),
        }
    }
}

fn default_privilege_separation() -> bool {
    true
}

#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct PathsConfig {
    /// Downloaded source bundles.
    #[serde(default = "default_srcdest")]
    pub srcdest: PathBuf,
    /// Extracted sources, one directory per package.
    #[serde(default = "default_buildroot")]
    pub buildroot: PathBuf,
    /// Built and downloaded binary packages.
    #[serde(default = "default_pkgdest")]
    pub pkgdest: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            srcdest: default_srcdest(),
            buildroot: default_buildroot(),
            pkgdest: default_pkgdest(),
        }
    }
}

fn default_srcdest() -> PathBuf {
    PathBuf::from(SRCDEST_DIR)
}

fn default_buildroot() -> PathBuf {
    PathBuf::from(BUILDROOT_DIR)
}

fn default_pkgdest() -> PathBuf {
    PathBuf::from(PKGDEST_DIR)
}

impl MawConfig {
    /// Loads the configuration. A missing file is not an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Ok(Config::builder()
            .add_source(File::from(path).format(FileFormat::Yaml).required(false))
            .add_source(
                Environment::with_prefix(MAW_CONFIG_ENV_VAR_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<MawConfig>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    #[serial]
    fn test_missing_file_loads_defaults() {
        let dir = tempdir().unwrap();
        let config = MawConfig::load(&dir.path().join("maw.yaml")).unwrap();
        assert_eq!(config, MawConfig::default());
        assert!(config.privilege_separation);
        assert_eq!(config.paths.pkgdest, PathBuf::from("/var/cache/maw/pkg"));
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("maw.yaml");
        std::fs::write(
            &path,
            r#"
privilege_separation: false
paths:
  srcdest: /tmp/maw/src
http:
  timeout: 5s
build:
  makepkg: /usr/local/bin/makepkg
  args: ["-s"]
"#,
        )
        .unwrap();

        let config = MawConfig::load(&path).unwrap();

        assert!(!config.privilege_separation);
        assert_eq!(config.paths.srcdest, PathBuf::from("/tmp/maw/src"));
        assert_eq!(config.paths.buildroot, PathBuf::from("/var/cache/maw/build"));
        assert_eq!(config.http.timeout, Duration::from_secs(5));
        assert_eq!(config.http.conn_timeout, Duration::from_secs(10));
        assert_eq!(config.build.makepkg, PathBuf::from("/usr/local/bin/makepkg"));
        assert_eq!(config.build.args, vec!["-s".to_string()]);
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("maw.yaml");
        std::fs::write(&path, "paths:\n  srcdest: /tmp/from-file\n").unwrap();

        unsafe { env::set_var("MAW_PATHS__SRCDEST", "/tmp/from-env") };
        unsafe { env::set_var("MAW_PRIVILEGE_SEPARATION", "false") };
        let config = MawConfig::load(&path);
        unsafe { env::remove_var("MAW_PATHS__SRCDEST") };
        unsafe { env::remove_var("MAW_PRIVILEGE_SEPARATION") };

        let config = config.unwrap();
        assert_eq!(config.paths.srcdest, PathBuf::from("/tmp/from-env"));
        assert!(!config.privilege_separation);
    }

    #[test]
    #[serial]
    fn test_invalid_file_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("maw.yaml");
        std::fs::write(&path, "http:\n  timeout: soon\n").unwrap();

        assert!(MawConfig::load(&path).is_err());
    }
}
