use crate::common::RecordingPackageManager;
use assert_matches::assert_matches;
use maw::event::channel::pub_sub;
use maw::fetch::{BatchFetcher, FetchError};
use maw::ipc::notify::SignalNotifier;
use maw::ipc::spawner::SupervisorSpawner;
use maw::operations::{OperationError, PackageOperations, SupervisedOperations};
use maw::package::builder::{BuildCommand, BuildError, ProcessSpawner};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

const MAW: &str = env!("CARGO_BIN_EXE_maw");

/// Resolves `<name>` to `/pkg/<name>`. Packages named `app*` are "built" by a process that runs
/// maw as its package manager to install the `dep` dependency, like the build tool does.
struct BuildingFetcher {
    spawner: SupervisorSpawner,
    config_path: PathBuf,
    work_dir: PathBuf,
}

impl BatchFetcher for BuildingFetcher {
    fn fetch_all(&self, names: &[String]) -> Result<Vec<PathBuf>, FetchError> {
        for name in names.iter().filter(|name| name.starts_with("app")) {
            let command = BuildCommand {
                program: PathBuf::from(MAW),
                args: vec![
                    "--config".to_string(),
                    self.config_path.to_string_lossy().into_owned(),
                    "-S".to_string(),
                    "--asdeps".to_string(),
                    "--noconfirm".to_string(),
                    "dep>=1.0".to_string(),
                ],
                current_dir: self.work_dir.clone(),
                envs: vec![("MAW_LOG_LEVEL".to_string(), "debug".to_string())],
                user: None,
            };
            let build_err = |source| FetchError::Build {
                package: name.clone(),
                source,
            };
            let mut child = self.spawner.spawn(command).map_err(BuildError::Spawn).map_err(build_err)?;
            let status = child.wait().map_err(BuildError::Wait).map_err(build_err)?;
            if !status.success() {
                return Err(build_err(BuildError::Failed(status.code().unwrap_or(-1))));
            }
        }
        Ok(names
            .iter()
            .map(|name| Path::new("/pkg").join(name))
            .collect())
    }
}

fn supervise(
    package_manager: Arc<RecordingPackageManager>,
    targets: &[&str],
) -> Result<(), OperationError> {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("maw.yaml");
    fs::write(&config_path, "log:\n  level: debug\n").unwrap();
    let work_dir = dir.path().to_path_buf();
    let (_stop_publisher, stop_consumer) = pub_sub();

    let operations = SupervisedOperations::new(
        move |spawner| {
            Arc::new(BuildingFetcher {
                spawner,
                config_path: config_path.clone(),
                work_dir: work_dir.clone(),
            }) as Arc<dyn BatchFetcher>
        },
        package_manager,
        Arc::new(SignalNotifier),
        stop_consumer,
    )
    .with_probe_interval(Duration::from_millis(200));

    let targets: Vec<String> = targets.iter().map(|t| t.to_string()).collect();
    operations.install(&targets, false)
}

#[test]
fn test_worker_dependency_install_goes_through_the_supervisor() {
    let package_manager = Arc::new(RecordingPackageManager::default());

    supervise(package_manager.clone(), &["app"]).unwrap();

    assert_eq!(
        *package_manager.installs.lock().unwrap(),
        vec![
            (vec![PathBuf::from("/pkg/dep")], true),
            (vec![PathBuf::from("/pkg/app")], false),
        ]
    );
}

#[test]
fn test_rejected_worker_request_fails_the_build() {
    let package_manager = Arc::new(RecordingPackageManager {
        failing: Some(PathBuf::from("/pkg/dep")),
        ..Default::default()
    });

    let result = supervise(package_manager.clone(), &["app", "lib"]);

    assert_matches!(
        result,
        Err(OperationError::Fetch(FetchError::Build { package, source: BuildError::Failed(1) })) => {
            assert_eq!(package, "app");
        }
    );
    // only the delegated dependency install was attempted
    assert_eq!(package_manager.installs.lock().unwrap().len(), 1);
}
