use crate::common::{RecordingPackageManager, fake_makepkg, script, source_bundle};
use assert_matches::assert_matches;
use httpmock::{Method::GET, MockServer};
use maw::config::MawConfig;
use maw::fetch::{BatchFetcher, FetchError};
use maw::http::client::try_build_client;
use maw::http::config::HttpConfig;
use maw::http::download::ConditionalDownloader;
use maw::operations::{DirectOperations, FetcherStack, PackageOperations};
use maw::package::builder::DirectSpawner;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::{TempDir, tempdir};

struct Fixture {
    dir: TempDir,
    _server: MockServer,
    config: MawConfig,
}

impl Fixture {
    /// The repositories offer `foo` from a local file, the community repository serves bundles
    /// for `bar` and `broken`, whose build fails.
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let repo = dir.path().join("repo");
        fs::create_dir(&repo).unwrap();
        fs::write(repo.join("foo-1-1-any.pkg.tar.zst"), "foo").unwrap();

        let pacman = script(
            dir.path(),
            "pacman",
            &format!(
                r#"if [ "$5" = "foo" ]; then echo "file://{}/foo-1-1-any.pkg.tar.zst"; exit 0; fi
echo "error: target not found: $5" >&2
exit 1"#,
                repo.display()
            ),
        );

        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/bar.tar.gz");
            then.status(200).body(source_bundle("bar", false));
        });
        server.mock(|when, then| {
            when.method(GET).path("/broken.tar.gz");
            then.status(200).body(source_bundle("broken", true));
        });
        server.mock(|when, then| {
            when.method(GET).path("/ghost.tar.gz");
            then.status(404);
        });

        let mut config = MawConfig::default();
        config.paths.srcdest = dir.path().join("src");
        config.paths.buildroot = dir.path().join("build");
        config.paths.pkgdest = dir.path().join("pkg");
        config.pacman.path = pacman;
        config.aur.url_template = format!("{}/{{name}}.tar.gz", server.base_url());
        config.build.makepkg = fake_makepkg(dir.path());
        config.build.args = vec!["-f".to_string()];
        for path in [
            &config.paths.srcdest,
            &config.paths.buildroot,
            &config.paths.pkgdest,
        ] {
            fs::create_dir(path).unwrap();
        }

        Self {
            dir,
            _server: server,
            config,
        }
    }

    fn fetcher(&self) -> Arc<dyn BatchFetcher> {
        let downloader = Arc::new(ConditionalDownloader::new(
            try_build_client(&HttpConfig::default()).unwrap(),
        ));
        FetcherStack::new(self.config.clone(), downloader, None, Path::new("/usr/bin/maw"))
            .build(DirectSpawner)
    }

    fn repo_package(&self, name: &str) -> PathBuf {
        self.dir.path().join("repo").join(format!("{name}-1-1-any.pkg.tar.zst"))
    }

    fn built_package(&self, name: &str) -> PathBuf {
        self.config.paths.pkgdest.join(format!("{name}-1-1-any.pkg.tar.zst"))
    }
}

fn names(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

#[test]
fn test_repository_and_community_packages_resolve_in_request_order() {
    let fixture = Fixture::new();

    let artifacts = fixture.fetcher().fetch_all(&names(&["bar", "foo"])).unwrap();

    assert_eq!(
        artifacts,
        vec![fixture.built_package("bar"), fixture.repo_package("foo")]
    );
    assert!(fixture.config.paths.srcdest.join("bar.src.tar.gz").is_file());
    assert!(fixture.config.paths.buildroot.join("bar").join("PKGBUILD").is_file());
}

#[test]
fn test_unknown_package_fails_the_whole_batch() {
    let fixture = Fixture::new();

    let result = fixture.fetcher().fetch_all(&names(&["foo", "ghost", "bar"]));

    assert_matches!(result, Err(FetchError::NotFound(name)) => assert_eq!(name, "ghost"));
}

#[test]
fn test_build_failure_names_the_package() {
    let fixture = Fixture::new();

    let result = fixture.fetcher().fetch_all(&names(&["broken", "bar"]));

    assert_matches!(result, Err(FetchError::Build { package, .. }) => assert_eq!(package, "broken"));
    assert!(!fixture.built_package("broken").exists());
}

#[test]
fn test_direct_install_runs_one_transaction() {
    let fixture = Fixture::new();
    let package_manager = Arc::new(RecordingPackageManager::default());
    let operations = DirectOperations::new(fixture.fetcher(), package_manager.clone());

    operations.install(&names(&["foo", "bar"]), false).unwrap();

    assert_eq!(
        *package_manager.installs.lock().unwrap(),
        vec![(
            vec![fixture.repo_package("foo"), fixture.built_package("bar")],
            false
        )]
    );
}

#[test]
fn test_failed_resolution_installs_nothing() {
    let fixture = Fixture::new();
    let package_manager = Arc::new(RecordingPackageManager::default());
    let operations = DirectOperations::new(fixture.fetcher(), package_manager.clone());

    assert!(operations.install(&names(&["foo", "ghost"]), false).is_err());
    assert!(package_manager.installs.lock().unwrap().is_empty());
}
