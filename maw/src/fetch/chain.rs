use super::{FetchError, PackageFetcher};
use std::path::PathBuf;
use tracing::{debug, instrument};

/// Tries each source in order until one of them reports something other than not-found.
pub struct ChainFetcher {
    fetchers: Vec<Box<dyn PackageFetcher>>,
}

impl ChainFetcher {
    pub fn new(fetchers: Vec<Box<dyn PackageFetcher>>) -> Self {
        Self { fetchers }
    }
}

impl PackageFetcher for ChainFetcher {
    #[instrument(skip_all, fields(package = name), name = "chain_fetch")]
    fn fetch(&self, name: &str) -> Result<Vec<PathBuf>, FetchError> {
        for (position, fetcher) in self.fetchers.iter().enumerate() {
            match fetcher.fetch(name) {
                Err(err) if err.is_not_found() => {
                    debug!(source = position, "Package not offered by source, trying next one");
                }
                result => return result,
            }
        }
        Err(FetchError::NotFound(name.to_string()))
    }
}
