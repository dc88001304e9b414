//! # Community repository fetcher
//!
//! Packages missing from the package manager repositories are looked up in the community
//! repository, which distributes source bundles. A bundle is downloaded only when it changed
//! since the cached copy, then extracted and built into installable packages.
use crate::defaults::{AUR_URL_PLACEHOLDER, AUR_URL_TEMPLATE, SOURCE_BUNDLE_SUFFIX};
use crate::fetch::{FetchError, PackageFetcher};
use crate::http::download::{ConditionalDownloader, DownloadOutcome};
use crate::package::builder::PackageBuilder;
use crate::package::name::validate_package_name;
use crate::package::source_bundle::SourceBundle;
use crate::utils::fs::{give_to, give_tree_to};
use crate::utils::target_user::TargetUser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use url::Url;

#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct AurConfig {
    /// Source bundle location, `{name}` is replaced by the package name.
    #[serde(default = "default_url_template")]
    pub url_template: String,
}

impl Default for AurConfig {
    fn default() -> Self {
        Self {
            url_template: default_url_template(),
        }
    }
}

fn default_url_template() -> String {
    AUR_URL_TEMPLATE.to_string()
}

pub struct AurFetcher<B> {
    config: AurConfig,
    downloader: Arc<ConditionalDownloader>,
    builder: B,
    srcdest: PathBuf,
    buildroot: PathBuf,
    user: Option<TargetUser>,
}

impl<B> AurFetcher<B>
where
    B: PackageBuilder,
{
    pub fn new(
        config: AurConfig,
        downloader: Arc<ConditionalDownloader>,
        builder: B,
        srcdest: PathBuf,
        buildroot: PathBuf,
    ) -> Self {
        Self {
            config,
            downloader,
            builder,
            srcdest,
            buildroot,
            user: None,
        }
    }

    /// Hands downloaded bundles and extracted sources to `user`, who runs the builds.
    pub fn with_user(self, user: Option<TargetUser>) -> Self {
        Self { user, ..self }
    }

    /// Cache location of the source bundle of `name`.
    pub fn bundle_path(&self, name: &str) -> PathBuf {
        self.srcdest.join(format!("{name}{SOURCE_BUNDLE_SUFFIX}"))
    }

    fn bundle_url(&self, name: &str) -> Result<Url, FetchError> {
        let raw = self.config.url_template.replace(AUR_URL_PLACEHOLDER, name);
        Url::parse(&raw).map_err(|err| FetchError::Io {
            package: name.to_string(),
            source: std::io::Error::other(format!("invalid source bundle url `{raw}`: {err}")),
        })
    }

    fn extract(&self, name: &str, bundle_path: &Path) -> Result<PathBuf, FetchError> {
        let extract_err = |source| FetchError::Extract {
            package: name.to_string(),
            source,
        };
        let mut bundle = SourceBundle::open(bundle_path).map_err(extract_err)?;
        let result = bundle.extract(&self.buildroot);
        bundle.close();
        result.map_err(extract_err)
    }
}

impl<B> PackageFetcher for AurFetcher<B>
where
    B: PackageBuilder,
{
    #[instrument(skip_all, fields(package = name), name = "aur_fetch")]
    fn fetch(&self, name: &str) -> Result<Vec<PathBuf>, FetchError> {
        let io_err = |source| FetchError::Io {
            package: name.to_string(),
            source,
        };
        validate_package_name(name)?;
        let url = self.bundle_url(name)?;
        let bundle_path = self.bundle_path(name);

        match self.downloader.download(&url, &bundle_path) {
            Ok(DownloadOutcome::NotFound) => return Err(FetchError::NotFound(name.to_string())),
            Ok(outcome) => debug!(?outcome, "Source bundle ready"),
            Err(source) => {
                return Err(FetchError::Download {
                    package: name.to_string(),
                    source,
                });
            }
        }
        give_to(&bundle_path, self.user.as_ref()).map_err(io_err)?;

        let source_dir = self.extract(name, &bundle_path)?;
        give_tree_to(&source_dir, self.user.as_ref()).map_err(io_err)?;

        info!("Building from source");
        let artifacts = self
            .builder
            .build(&source_dir)
            .map_err(|source| FetchError::Build {
                package: name.to_string(),
                source,
            })?;
        if artifacts.is_empty() {
            return Err(FetchError::NoArtifacts(name.to_string()));
        }
        Ok(artifacts)
    }
}
