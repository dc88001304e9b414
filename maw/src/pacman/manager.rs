use crate::package::name::{InvalidPackageName, validate_package_name};
use std::io;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Debug, Error)]
pub enum PackageManagerError {
    #[error("could not run the package manager: {0}")]
    Spawn(io::Error),
    #[error("package manager exited with code {0}")]
    Failed(i32),
    #[error("package manager was terminated by a signal")]
    Killed,
    #[error(transparent)]
    InvalidName(#[from] InvalidPackageName),
}

/// Destructive operations on the package database. Only one of them may run at a time.
#[cfg_attr(test, mockall::automock)]
pub trait PackageManager: Send + Sync {
    fn install(&self, artifacts: &[PathBuf], as_deps: bool) -> Result<(), PackageManagerError>;
    fn remove(&self, names: &[String]) -> Result<(), PackageManagerError>;
}

/// Runs the package manager with the terminal attached, so prompts reach the user.
pub struct Pacman {
    path: PathBuf,
}

impl Pacman {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Runs the package manager with `args` and returns its exit status untouched.
    pub fn passthrough<I, S>(&self, args: I) -> Result<ExitStatus, PackageManagerError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        Command::new(&self.path)
            .args(args)
            .status()
            .map_err(PackageManagerError::Spawn)
    }

    fn run(&self, args: Vec<String>) -> Result<(), PackageManagerError> {
        let status = self.passthrough(&args)?;
        match status.code() {
            Some(0) => Ok(()),
            Some(code) => Err(PackageManagerError::Failed(code)),
            None => Err(PackageManagerError::Killed),
        }
    }
}

impl PackageManager for Pacman {
    #[instrument(skip_all, fields(count = artifacts.len(), as_deps = as_deps), name = "install")]
    fn install(&self, artifacts: &[PathBuf], as_deps: bool) -> Result<(), PackageManagerError> {
        let mut args = vec!["-U".to_string()];
        if as_deps {
            args.push("--asdeps".to_string());
        }
        args.extend(
            artifacts
                .iter()
                .map(|path| path.to_string_lossy().into_owned()),
        );
        info!("Installing {}", artifacts.len());
        self.run(args)
    }

    #[instrument(skip_all, fields(packages = %names.join(" ")), name = "remove")]
    fn remove(&self, names: &[String]) -> Result<(), PackageManagerError> {
        for name in names {
            validate_package_name(name)?;
        }
        let mut args = vec!["-R".to_string()];
        args.extend(names.iter().cloned());
        info!("Removing packages");
        self.run(args)
    }
}
