//! # Privileged operations
//!
//! [PackageOperations] is the single entry point for installing and removing packages. Which
//! process ends up running the package manager depends on the implementation:
//! - [DirectOperations] resolves and installs in-process, without privilege separation.
//! - [SupervisedOperations] makes the current process the supervisor of the run.
//! - [DelegatedOperations] forwards the request to the supervisor that started this process.
use crate::aur::AurFetcher;
use crate::config::MawConfig;
use crate::event::channel::{EventConsumer, pub_sub};
use crate::event::{ApplicationEvent, Request, SupervisorEvent};
use crate::fetch::chain::ChainFetcher;
use crate::fetch::multi::MultiFetcher;
use crate::fetch::{BatchFetcher, FetchError, PackageFetcher};
use crate::http::download::ConditionalDownloader;
use crate::ipc::message::{Action, Secret};
use crate::ipc::notify::WorkerNotifier;
use crate::ipc::reader::spawn_reader;
use crate::ipc::spawner::{BuildLauncher, SupervisorSpawner};
use crate::ipc::supervisor::{Supervisor, SupervisorError};
use crate::ipc::worker::{Worker, WorkerError};
use crate::package::builder::{MakepkgBuilder, ProcessSpawner};
use crate::pacman::fetcher::PacmanFetcher;
use crate::pacman::lookup::PacmanLookup;
use crate::pacman::manager::{PackageManager, PackageManagerError};
use crate::utils::target_user::TargetUser;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::unistd::pipe2;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum OperationError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    PackageManager(#[from] PackageManagerError),
    #[error("delegated request failed: {0}")]
    Delegation(#[from] WorkerError),
    #[error("could not create the control pipe: {0}")]
    ControlPipe(Errno),
    #[error("supervisor stopped: {0}")]
    Supervisor(String),
}

impl From<SupervisorError> for OperationError {
    fn from(err: SupervisorError) -> Self {
        match err {
            SupervisorError::Operation(err) => err,
            other => OperationError::Supervisor(other.to_string()),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait PackageOperations {
    /// Resolves `targets` and installs every produced artifact in one transaction.
    fn install(&self, targets: &[String], as_deps: bool) -> Result<(), OperationError>;
    fn remove(&self, targets: &[String]) -> Result<(), OperationError>;
}

/// Assembles the resolution pipeline: the package manager repositories first, then the
/// community repository, with every requested name resolved in parallel.
pub struct FetcherStack {
    config: MawConfig,
    downloader: Arc<ConditionalDownloader>,
    user: Option<TargetUser>,
    maw_path: PathBuf,
}

impl FetcherStack {
    /// `maw_path` is handed to builds as their package manager, so the dependency installs they
    /// request come back to maw.
    pub fn new(
        config: MawConfig,
        downloader: Arc<ConditionalDownloader>,
        user: Option<TargetUser>,
        maw_path: &Path,
    ) -> Self {
        Self {
            config,
            downloader,
            user,
            maw_path: maw_path.to_path_buf(),
        }
    }

    pub fn build<S>(&self, spawner: S) -> Arc<dyn BatchFetcher>
    where
        S: ProcessSpawner + 'static,
    {
        let paths = &self.config.paths;
        let builder = MakepkgBuilder::new(spawner, self.config.build.clone(), paths.pkgdest.clone())
            .with_env("PACMAN", self.maw_path.display())
            .with_user(self.user.clone());

        let repositories = PacmanFetcher::new(
            PacmanLookup::new(self.config.pacman.path.clone()),
            self.downloader.clone(),
            paths.pkgdest.clone(),
        );
        let community = AurFetcher::new(
            self.config.aur.clone(),
            self.downloader.clone(),
            builder,
            paths.srcdest.clone(),
            paths.buildroot.clone(),
        )
        .with_user(self.user.clone());

        let chain: Vec<Box<dyn PackageFetcher>> = vec![Box::new(repositories), Box::new(community)];
        Arc::new(MultiFetcher::new(Arc::new(ChainFetcher::new(chain))))
    }
}

/// Runs everything in the current process.
pub struct DirectOperations {
    fetcher: Arc<dyn BatchFetcher>,
    package_manager: Arc<dyn PackageManager>,
}

impl DirectOperations {
    pub fn new(fetcher: Arc<dyn BatchFetcher>, package_manager: Arc<dyn PackageManager>) -> Self {
        Self {
            fetcher,
            package_manager,
        }
    }
}

impl PackageOperations for DirectOperations {
    fn install(&self, targets: &[String], as_deps: bool) -> Result<(), OperationError> {
        if targets.is_empty() {
            return Ok(());
        }
        let artifacts = self.fetcher.fetch_all(targets)?;
        if artifacts.is_empty() {
            return Ok(());
        }
        Ok(self.package_manager.install(&artifacts, as_deps)?)
    }

    fn remove(&self, targets: &[String]) -> Result<(), OperationError> {
        if targets.is_empty() {
            return Ok(());
        }
        Ok(self.package_manager.remove(targets)?)
    }
}

/// Runs each operation under a fresh [Supervisor], which also serves the workers the operation
/// starts. Returns once the operation finished and every worker is gone.
pub struct SupervisedOperations<F> {
    fetcher_factory: F,
    package_manager: Arc<dyn PackageManager>,
    notifier: Arc<dyn WorkerNotifier>,
    application_events: EventConsumer<ApplicationEvent>,
    probe_interval: Option<Duration>,
}

impl<F> SupervisedOperations<F>
where
    F: Fn(SupervisorSpawner) -> Arc<dyn BatchFetcher>,
{
    /// `fetcher_factory` builds the resolution pipeline around a spawner that starts builds
    /// from the supervisor.
    pub fn new(
        fetcher_factory: F,
        package_manager: Arc<dyn PackageManager>,
        notifier: Arc<dyn WorkerNotifier>,
        application_events: EventConsumer<ApplicationEvent>,
    ) -> Self {
        Self {
            fetcher_factory,
            package_manager,
            notifier,
            application_events,
            probe_interval: None,
        }
    }

    pub fn with_probe_interval(self, probe_interval: Duration) -> Self {
        Self {
            probe_interval: Some(probe_interval),
            ..self
        }
    }

    fn supervise(&self, request: Request) -> Result<(), OperationError> {
        let (read_end, write_end) = pipe2(OFlag::O_CLOEXEC).map_err(OperationError::ControlPipe)?;
        let secret = Secret::generate();
        let (publisher, consumer) = pub_sub();

        // left detached, it ends once every copy of the write end is closed
        let _reader = spawn_reader(read_end, secret.clone(), publisher.clone());
        let fetcher = (self.fetcher_factory)(SupervisorSpawner::new(publisher.clone()));

        let mut supervisor = Supervisor::new(
            BuildLauncher::new(write_end, secret),
            fetcher,
            self.package_manager.clone(),
            self.notifier.clone(),
            (publisher.clone(), consumer),
            self.application_events.clone(),
        );
        if let Some(probe_interval) = self.probe_interval {
            supervisor = supervisor.with_probe_interval(probe_interval);
        }

        publisher
            .publish(SupervisorEvent::LocalRequested(request))
            .map_err(|err| OperationError::Supervisor(err.to_string()))?;
        info!("Supervising the run");
        Ok(supervisor.run()?)
    }
}

impl<F> PackageOperations for SupervisedOperations<F>
where
    F: Fn(SupervisorSpawner) -> Arc<dyn BatchFetcher>,
{
    fn install(&self, targets: &[String], as_deps: bool) -> Result<(), OperationError> {
        self.supervise(Request::Install {
            targets: targets.to_vec(),
            as_deps,
        })
    }

    fn remove(&self, targets: &[String]) -> Result<(), OperationError> {
        self.supervise(Request::Remove {
            targets: targets.to_vec(),
        })
    }
}

/// Hands every operation to the supervisor of the run this process belongs to.
pub struct DelegatedOperations {
    worker: Worker,
}

impl DelegatedOperations {
    pub fn new(worker: Worker) -> Self {
        Self { worker }
    }
}

impl PackageOperations for DelegatedOperations {
    fn install(&self, targets: &[String], as_deps: bool) -> Result<(), OperationError> {
        if !as_deps {
            debug!("Delegated installs are always recorded as dependencies");
        }
        Ok(self.worker.request(Action::Install, targets)?)
    }

    fn remove(&self, targets: &[String]) -> Result<(), OperationError> {
        Ok(self.worker.request(Action::Remove, targets)?)
    }
}
