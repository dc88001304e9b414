use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

const TARGET_NOT_FOUND: &str = "target not found";

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("could not run the package manager: {0}")]
    Spawn(io::Error),
    #[error("package manager exited with {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },
    #[error("invalid url `{line}`: {source}")]
    InvalidUrl {
        line: String,
        source: url::ParseError,
    },
}

/// Asks the configured repositories where a package can be downloaded from.
#[cfg_attr(test, mockall::automock)]
pub trait PackageLookup: Send + Sync {
    /// Returns the download urls for `name`, or `None` when no repository offers it.
    fn lookup(&self, name: &str) -> Result<Option<Vec<Url>>, LookupError>;
}

pub struct PacmanLookup {
    pacman: PathBuf,
}

impl PacmanLookup {
    pub fn new(pacman: PathBuf) -> Self {
        Self { pacman }
    }
}

impl PackageLookup for PacmanLookup {
    #[instrument(skip_all, fields(package = name), name = "repository_lookup")]
    fn lookup(&self, name: &str) -> Result<Option<Vec<Url>>, LookupError> {
        // print urls only, without dependencies
        let output = Command::new(&self.pacman)
            .args(["-S", "--print", "--nodeps", "--nodeps", name])
            .stdin(Stdio::null())
            .output()
            .map_err(LookupError::Spawn)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.contains(TARGET_NOT_FOUND) {
                debug!("Not offered by any repository");
                return Ok(None);
            }
            return Err(LookupError::Failed {
                code: output.status.code(),
                stderr,
            });
        }

        let urls = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                Url::parse(line).map_err(|source| LookupError::InvalidUrl {
                    line: line.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok((!urls.is_empty()).then_some(urls))
    }
}
