//! Command line interface of maw.
//!
//! maw answers the subset of the package manager command line that build tools use, so it can
//! stand in for the package manager during builds:
//! - `-S [--asdeps] <targets>` resolves, builds when needed and installs the targets.
//! - `-R <targets>` removes the targets.
//! - `-Q…` and `-T…` are handed to the package manager untouched.
use crate::config::{ConfigError, MawConfig};
use crate::defaults::{MAW_CONFIG_PATH, MAW_VERSION};
use crate::event::ApplicationEvent;
use crate::event::channel::{EventPublisher, pub_sub};
use crate::http::client::{HttpBuildError, try_build_client};
use crate::http::download::ConditionalDownloader;
use crate::instrumentation::logs::{FileLoggerGuard, LoggingError};
use crate::ipc::notify::SignalNotifier;
use crate::ipc::worker::{Worker, WorkerError};
use crate::operations::{
    DelegatedOperations, DirectOperations, FetcherStack, OperationError, PackageOperations,
    SupervisedOperations,
};
use crate::package::builder::DirectSpawner;
use crate::pacman::manager::Pacman;
use crate::utils::fs::ensure_dir;
use crate::utils::target_user::TargetUser;
use clap::{ArgGroup, Args, Parser};
use std::env;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

/// Errors preventing maw from starting.
#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not initialize logging: {0}")]
    Logging(#[from] LoggingError),
    #[error("could not connect to the supervisor: {0}")]
    Worker(#[from] WorkerError),
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("could not prepare `{}`: {source}", path.display())]
    Directory { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Http(#[from] HttpBuildError),
    #[error("could not locate the maw executable: {0}")]
    CurrentExe(io::Error),
    #[error("could not set the signal handler: {0}")]
    SignalHandler(#[from] ctrlc::Error),
    #[error(transparent)]
    Operation(#[from] OperationError),
}

#[derive(Parser, Debug)]
#[command(author, version = MAW_VERSION, about, long_about = None)]
#[command(group(ArgGroup::new("operation").required(true).args(["sync", "remove"])))]
pub struct Command {
    /// Install packages, building the ones the repositories lack
    #[arg(short = 'S', long)]
    sync: bool,

    /// Remove packages
    #[arg(short = 'R', long)]
    remove: bool,

    /// Mark installed packages as dependencies
    #[arg(long)]
    asdeps: bool,

    /// Configuration file
    #[arg(long, value_name = "PATH", default_value = MAW_CONFIG_PATH)]
    config: PathBuf,

    #[command(flatten)]
    compat: CompatFlags,

    /// Package names, version constraints are ignored
    #[arg(required = true, value_name = "TARGETS")]
    targets: Vec<String>,
}

/// Package manager flags build tools pass along. Accepted and ignored.
#[derive(Args, Debug)]
#[allow(dead_code)]
struct CompatFlags {
    #[arg(short = 'n', long = "nosave", hide = true)]
    nosave: bool,
    #[arg(short = 's', long = "recursive", hide = true)]
    recursive: bool,
    #[arg(short = 'c', long = "cascade", hide = true)]
    cascade: bool,
    #[arg(short = 'd', long = "nodeps", hide = true, action = clap::ArgAction::Count)]
    nodeps: u8,
    #[arg(short = 'u', long = "sysupgrade", hide = true)]
    sysupgrade: bool,
    #[arg(short = 'q', long = "quiet", hide = true)]
    quiet: bool,
    #[arg(long, hide = true)]
    noconfirm: bool,
    #[arg(long, hide = true)]
    needed: bool,
}

impl Command {
    /// Parses the command line, runs the requested operation and maps its outcome to the
    /// process exit code.
    pub fn run() -> ExitCode {
        let args: Vec<OsString> = env::args_os().collect();
        if is_passthrough(args.get(1..).unwrap_or_default()) {
            return Self::passthrough(&args[1..]);
        }
        let command = Self::parse_from(&args);

        // before anything starts a thread
        let Ok((worker, config, _guard)) = command.init().inspect_err(|err| {
            // logging might not be initialized
            eprintln!("error: {err}");
        }) else {
            return ExitCode::FAILURE;
        };

        match command.execute(config, worker) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                error!("{err}");
                ExitCode::FAILURE
            }
        }
    }

    fn init(&self) -> Result<(Option<Worker>, MawConfig, FileLoggerGuard), InitError> {
        let worker = Worker::detect()?;
        let config = MawConfig::load(&self.config)?;
        let guard = config.log.try_init()?;
        debug!(config = %self.config.display(), worker = worker.is_some(), "maw {MAW_VERSION}");
        Ok((worker, config, guard))
    }

    fn execute(&self, config: MawConfig, worker: Option<Worker>) -> Result<(), RunError> {
        let targets = trim_dep_specs(&self.targets);
        let operations: Box<dyn PackageOperations> = match worker {
            Some(worker) => {
                info!("Delegating to the supervisor");
                Box::new(DelegatedOperations::new(worker))
            }
            None => local_operations(config)?,
        };

        if self.sync {
            operations.install(&targets, self.asdeps)?;
        } else {
            operations.remove(&targets)?;
        }
        Ok(())
    }

    fn passthrough(args: &[OsString]) -> ExitCode {
        let config = match MawConfig::load(Path::new(MAW_CONFIG_PATH)) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("error: {err}");
                return ExitCode::FAILURE;
            }
        };
        match Pacman::new(config.pacman.path).passthrough(args) {
            Ok(status) => status
                .code()
                .and_then(|code| u8::try_from(code).ok())
                .map(ExitCode::from)
                .unwrap_or(ExitCode::FAILURE),
            Err(err) => {
                eprintln!("error: {err}");
                ExitCode::FAILURE
            }
        }
    }
}

/// Operations of a process that was not started by a supervisor.
fn local_operations(config: MawConfig) -> Result<Box<dyn PackageOperations>, RunError> {
    let user = TargetUser::from_sudo_env();
    for path in [
        &config.paths.srcdest,
        &config.paths.buildroot,
        &config.paths.pkgdest,
    ] {
        ensure_dir(path, user.as_ref()).map_err(|source| RunError::Directory {
            path: path.clone(),
            source,
        })?;
    }

    let downloader = Arc::new(ConditionalDownloader::new(try_build_client(&config.http)?));
    let maw_path = env::current_exe().map_err(RunError::CurrentExe)?;
    let package_manager = Arc::new(Pacman::new(config.pacman.path.clone()));
    let privilege_separation = config.privilege_separation;
    let stack = FetcherStack::new(config, downloader, user, &maw_path);

    if !privilege_separation {
        debug!("Privilege separation disabled");
        return Ok(Box::new(DirectOperations::new(
            stack.build(DirectSpawner),
            package_manager,
        )));
    }

    let (stop_publisher, stop_consumer) = pub_sub();
    create_shutdown_signal_handler(stop_publisher)?;
    Ok(Box::new(SupervisedOperations::new(
        move |spawner| stack.build(spawner),
        package_manager,
        Arc::new(SignalNotifier),
        stop_consumer,
    )))
}

/// Turns interrupt, hangup and termination signals into [ApplicationEvent::StopRequested], so the
/// supervisor can terminate its workers before exiting.
fn create_shutdown_signal_handler(
    publisher: EventPublisher<ApplicationEvent>,
) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        info!("Stop requested");
        let _ = publisher
            .publish(ApplicationEvent::StopRequested)
            .inspect_err(|err| error!("Could not send the stop request: {err}"));
    })
    .inspect_err(|err| error!("Could not set the signal handler: {err}"))
}

/// Query (`-Q`) and dependency test (`-T`) invocations belong to the package manager.
fn is_passthrough(args: &[OsString]) -> bool {
    args.iter().any(|arg| {
        let Some(arg) = arg.to_str() else {
            return false;
        };
        match arg.strip_prefix("--") {
            Some(long) => long == "query" || long == "deptest",
            None => {
                arg.starts_with('-') && arg[1..].chars().any(|flag| flag == 'Q' || flag == 'T')
            }
        }
    })
}

/// Drops version constraints: `foo>=1.2` becomes `foo`.
fn trim_dep_specs(targets: &[String]) -> Vec<String> {
    targets
        .iter()
        .map(|target| {
            target
                .split(['<', '>', '='])
                .next()
                .unwrap_or_default()
                .to_string()
        })
        .filter(|name| !name.is_empty())
        .collect()
}
