//! Boundary with the system package manager: repository lookups, and the install and removal
//! operations only the supervisor may run.
use crate::defaults::PACMAN_PATH;
use serde::Deserialize;
use std::path::PathBuf;

pub mod fetcher;
pub mod lookup;
pub mod manager;

#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct PacmanConfig {
    #[serde(default = "default_path")]
    pub path: PathBuf,
}

impl Default for PacmanConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
        }
    }
}

fn default_path() -> PathBuf {
    PathBuf::from(PACMAN_PATH)
}
