use super::lookup::PackageLookup;
use crate::fetch::{FetchError, PackageFetcher};
use crate::http::download::{ConditionalDownloader, DownloadError, DownloadOutcome};
use crate::package::name::validate_package_name;
use http::StatusCode;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, instrument};
use url::Url;

/// Fetches prebuilt packages from the package manager's own repositories.
pub struct PacmanFetcher<L> {
    lookup: L,
    downloader: Arc<ConditionalDownloader>,
    pkgdest: PathBuf,
}

impl<L> PacmanFetcher<L>
where
    L: PackageLookup,
{
    pub fn new(lookup: L, downloader: Arc<ConditionalDownloader>, pkgdest: PathBuf) -> Self {
        Self {
            lookup,
            downloader,
            pkgdest,
        }
    }

    fn retrieve(&self, name: &str, url: &Url) -> Result<PathBuf, FetchError> {
        if url.scheme() == "file" {
            return url.to_file_path().map_err(|_| FetchError::Io {
                package: name.to_string(),
                source: std::io::Error::other(format!("invalid local path `{url}`")),
            });
        }

        let file_name = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .unwrap_or(name);
        let dest = self.pkgdest.join(file_name);

        match self.downloader.download(url, &dest) {
            Ok(DownloadOutcome::Downloaded | DownloadOutcome::NotModified) => Ok(dest),
            // the repository database announced it, a missing file is not a fallback case
            Ok(DownloadOutcome::NotFound) => Err(FetchError::Download {
                package: name.to_string(),
                source: DownloadError::UnexpectedStatus {
                    url: url.clone(),
                    status: StatusCode::NOT_FOUND,
                },
            }),
            Err(source) => Err(FetchError::Download {
                package: name.to_string(),
                source,
            }),
        }
    }
}

impl<L> PackageFetcher for PacmanFetcher<L>
where
    L: PackageLookup,
{
    #[instrument(skip_all, fields(package = name), name = "repository_fetch")]
    fn fetch(&self, name: &str) -> Result<Vec<PathBuf>, FetchError> {
        validate_package_name(name)?;
        let urls = self
            .lookup
            .lookup(name)
            .map_err(|source| FetchError::Lookup {
                package: name.to_string(),
                source,
            })?
            .ok_or_else(|| FetchError::NotFound(name.to_string()))?;

        debug!(count = urls.len(), "Found in repositories");
        urls.iter().map(|url| self.retrieve(name, url)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::client::try_build_client;
    use crate::http::config::HttpConfig;
    use crate::pacman::lookup::{LookupError, MockPackageLookup};
    use assert_matches::assert_matches;
    use httpmock::{Method::GET, MockServer};
    use std::fs;
    use tempfile::tempdir;

    fn downloader() -> Arc<ConditionalDownloader> {
        Arc::new(ConditionalDownloader::new(
            try_build_client(&HttpConfig::default()).unwrap(),
        ))
    }

    fn lookup_returning(urls: Option<Vec<String>>) -> MockPackageLookup {
        let mut lookup = MockPackageLookup::new();
        lookup.expect_lookup().once().returning(move |_| {
            Ok(urls
                .clone()
                .map(|urls| urls.iter().map(|u| Url::parse(u).unwrap()).collect()))
        });
        lookup
    }

    #[test]
    fn test_fetch_remote_package() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/core/foo-1.0-1-any.pkg.tar.zst");
            then.status(200).body("package");
        });
        let pkgdest = tempdir().unwrap();
        let fetcher = PacmanFetcher::new(
            lookup_returning(Some(vec![server.url("/core/foo-1.0-1-any.pkg.tar.zst")])),
            downloader(),
            pkgdest.path().to_path_buf(),
        );

        let artifacts = fetcher.fetch("foo").unwrap();

        let expected = pkgdest.path().join("foo-1.0-1-any.pkg.tar.zst");
        assert_eq!(artifacts, vec![expected.clone()]);
        assert_eq!(fs::read_to_string(expected).unwrap(), "package");
    }

    #[test]
    fn test_fetch_local_repository_package() {
        let pkgdest = tempdir().unwrap();
        let fetcher = PacmanFetcher::new(
            lookup_returning(Some(vec!["file:///srv/repo/foo-1.0-1-any.pkg.tar.zst".into()])),
            downloader(),
            pkgdest.path().to_path_buf(),
        );

        assert_eq!(
            fetcher.fetch("foo").unwrap(),
            vec![PathBuf::from("/srv/repo/foo-1.0-1-any.pkg.tar.zst")]
        );
    }

    #[test]
    fn test_fetch_not_in_repositories() {
        let pkgdest = tempdir().unwrap();
        let fetcher =
            PacmanFetcher::new(lookup_returning(None), downloader(), pkgdest.path().to_path_buf());

        assert_matches!(fetcher.fetch("ghost"), Err(FetchError::NotFound(name)) => {
            assert_eq!(name, "ghost");
        });
    }

    #[test]
    fn test_option_like_name_never_reaches_the_lookup() {
        let mut lookup = MockPackageLookup::new();
        lookup.expect_lookup().never();
        let pkgdest = tempdir().unwrap();
        let fetcher = PacmanFetcher::new(lookup, downloader(), pkgdest.path().to_path_buf());

        assert_matches!(
            fetcher.fetch("--config=/tmp/evil.conf"),
            Err(FetchError::InvalidName(_))
        );
    }

    #[test]
    fn test_missing_file_on_mirror_is_an_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/core/foo-1.0-1-any.pkg.tar.zst");
            then.status(404);
        });
        let pkgdest = tempdir().unwrap();
        let fetcher = PacmanFetcher::new(
            lookup_returning(Some(vec![server.url("/core/foo-1.0-1-any.pkg.tar.zst")])),
            downloader(),
            pkgdest.path().to_path_buf(),
        );

        assert_matches!(fetcher.fetch("foo"), Err(FetchError::Download { .. }));
    }

    #[test]
    fn test_lookup_error() {
        let mut lookup = MockPackageLookup::new();
        lookup.expect_lookup().once().returning(|_| {
            Err(LookupError::Failed {
                code: Some(1),
                stderr: "boom".into(),
            })
        });
        let pkgdest = tempdir().unwrap();
        let fetcher = PacmanFetcher::new(lookup, downloader(), pkgdest.path().to_path_buf());

        assert_matches!(fetcher.fetch("foo"), Err(FetchError::Lookup { package, .. }) => {
            assert_eq!(package, "foo");
        });
    }
}
