use super::{BatchFetcher, FetchError, PackageFetcher};
use crate::event::channel::{EventConsumer, oneshot};
use crate::utils::threads::spawn_named_thread;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Resolves every requested name in its own thread and gathers the results in request order.
///
/// The first failure found while gathering, in request order, aborts the batch. Resolutions still
/// in flight at that point run to completion and their results are discarded.
pub struct MultiFetcher {
    fetcher: Arc<dyn PackageFetcher>,
}

impl MultiFetcher {
    pub fn new(fetcher: Arc<dyn PackageFetcher>) -> Self {
        Self { fetcher }
    }

    fn spawn_fetch(&self, name: &str) -> EventConsumer<Result<Vec<PathBuf>, FetchError>> {
        let (publisher, consumer) = oneshot();
        let fetcher = self.fetcher.clone();
        let package = name.to_string();
        spawn_named_thread(format!("fetch-{name}"), move || {
            let result = fetcher.fetch(&package);
            if publisher.publish(result).is_err() {
                debug!(package, "Batch already finished, discarding result");
            }
        });
        consumer
    }
}

impl BatchFetcher for MultiFetcher {
    #[instrument(skip_all, fields(packages = %names.join(" ")), name = "batch_fetch")]
    fn fetch_all(&self, names: &[String]) -> Result<Vec<PathBuf>, FetchError> {
        let in_flight: Vec<_> = names
            .iter()
            .map(|name| (name, self.spawn_fetch(name)))
            .collect();

        let mut artifacts = Vec::new();
        for (name, completion) in in_flight {
            let result = completion
                .recv()
                .map_err(|_| FetchError::Abandoned(name.clone()))?;
            artifacts.extend(result?);
        }
        Ok(artifacts)
    }
}
