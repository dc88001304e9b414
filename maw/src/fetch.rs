//! # Package fetching
//!
//! A fetcher resolves one package name into the installable artifacts it stands for. Every
//! request ends in exactly one of three outcomes:
//! - a non-empty list of artifact paths,
//! - [FetchError::NotFound], meaning this source does not offer the package and the next one
//!   may be tried,
//! - any other [FetchError], which aborts the resolution.
//!
//! [chain::ChainFetcher] composes sources sequentially and [multi::MultiFetcher] resolves a whole
//! batch of names in parallel.
use crate::http::download::DownloadError;
use crate::package::builder::BuildError;
use crate::package::name::InvalidPackageName;
use crate::package::source_bundle::ExtractError;
use crate::pacman::lookup::LookupError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub mod chain;
pub mod multi;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("package `{0}` was not found")]
    NotFound(String),
    #[error(transparent)]
    InvalidName(#[from] InvalidPackageName),
    #[error("could not download `{package}`: {source}")]
    Download {
        package: String,
        source: DownloadError,
    },
    #[error("could not extract `{package}`: {source}")]
    Extract {
        package: String,
        source: ExtractError,
    },
    #[error("could not build `{package}`: {source}")]
    Build { package: String, source: BuildError },
    #[error("could not look up `{package}`: {source}")]
    Lookup {
        package: String,
        source: LookupError,
    },
    #[error("could not prepare `{package}`: {source}")]
    Io { package: String, source: io::Error },
    #[error("building `{0}` did not produce any package")]
    NoArtifacts(String),
    #[error("resolution of `{0}` ended without reporting a result")]
    Abandoned(String),
}

impl FetchError {
    /// Name of the package the error refers to.
    pub fn package(&self) -> &str {
        match self {
            FetchError::NotFound(package)
            | FetchError::InvalidName(InvalidPackageName(package))
            | FetchError::NoArtifacts(package)
            | FetchError::Abandoned(package)
            | FetchError::Download { package, .. }
            | FetchError::Extract { package, .. }
            | FetchError::Build { package, .. }
            | FetchError::Lookup { package, .. }
            | FetchError::Io { package, .. } => package,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound(_))
    }
}

/// Resolves a single package name into the paths of its installable artifacts.
#[cfg_attr(test, mockall::automock)]
pub trait PackageFetcher: Send + Sync {
    fn fetch(&self, name: &str) -> Result<Vec<PathBuf>, FetchError>;
}

/// Resolves a batch of package names into one aggregated artifact list.
#[cfg_attr(test, mockall::automock)]
pub trait BatchFetcher: Send + Sync {
    fn fetch_all(&self, names: &[String]) -> Result<Vec<PathBuf>, FetchError>;
}
