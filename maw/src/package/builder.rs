//! Builds of extracted source directories through the external build tool.
//!
//! The tool reports the packages it produced through a private result file, one path per line,
//! filled by a small shell shim wrapped around the build tool invocation.
use crate::defaults::{BUILD_SHELL, MAKEPKG, MAKEPKG_ARGS};
use crate::utils::fs::give_to;
use crate::utils::target_user::TargetUser;
use serde::Deserialize;
use std::fs;
use std::io;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Runs the build tool with the remaining arguments, then appends every package it reports as
/// produced to the result file given as first argument.
const BUILD_SHIM: &str = r#"result="$1"; shift
makepkg="$1"; shift
"$makepkg" "$@" || exit
"$makepkg" --packagelist | while IFS= read -r pkg; do
    if [ -f "$pkg" ]; then printf '%s\n' "$pkg" >> "$result"; fi
done
"#;
const BUILD_SHIM_NAME: &str = "maw-makepkg";

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("could not prepare the build result file: {0}")]
    ResultFile(io::Error),
    #[error("could not start the build: {0}")]
    Spawn(io::Error),
    #[error("could not wait for the build: {0}")]
    Wait(io::Error),
    #[error("build exited with code {0}")]
    Failed(i32),
    #[error("build was terminated by signal {0}")]
    Killed(i32),
    #[error("could not read the build result file: {0}")]
    ReadResult(io::Error),
}

#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct BuildConfig {
    /// Must be bash. POSIX shells such as dash drop environment entries whose names are not
    /// valid shell identifiers, the run secret among them, and builds could then never reach
    /// the supervisor.
    #[serde(default = "default_shell")]
    pub shell: PathBuf,
    #[serde(default = "default_makepkg")]
    pub makepkg: PathBuf,
    #[serde(default = "default_args")]
    pub args: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            makepkg: default_makepkg(),
            args: default_args(),
        }
    }
}

fn default_shell() -> PathBuf {
    PathBuf::from(BUILD_SHELL)
}

fn default_makepkg() -> PathBuf {
    PathBuf::from(MAKEPKG)
}

fn default_args() -> Vec<String> {
    MAKEPKG_ARGS.iter().map(|arg| arg.to_string()).collect()
}

/// Everything needed to start a build process, independently of who starts it.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub current_dir: PathBuf,
    pub envs: Vec<(String, String)>,
    /// Unprivileged identity the process runs as.
    pub user: Option<TargetUser>,
}

impl BuildCommand {
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir(&self.current_dir)
            .envs(self.envs.iter().cloned());
        if let Some(user) = &self.user {
            command.uid(user.uid.as_raw()).gid(user.gid.as_raw());
        }
        command
    }
}

/// Starts build processes. Privilege-separated runs delegate this to the supervisor.
#[cfg_attr(test, mockall::automock)]
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, command: BuildCommand) -> io::Result<Child>;
}

/// Spawns build processes from the current process.
pub struct DirectSpawner;

impl ProcessSpawner for DirectSpawner {
    fn spawn(&self, command: BuildCommand) -> io::Result<Child> {
        command.to_command().spawn()
    }
}

/// Turns an extracted source directory into the ordered list of packages it produced.
pub trait PackageBuilder: Send + Sync {
    fn build(&self, source_dir: &Path) -> Result<Vec<PathBuf>, BuildError>;
}

pub struct MakepkgBuilder<S> {
    spawner: S,
    config: BuildConfig,
    pkgdest: PathBuf,
    envs: Vec<(String, String)>,
    user: Option<TargetUser>,
}

impl<S> MakepkgBuilder<S>
where
    S: ProcessSpawner,
{
    pub fn new(spawner: S, config: BuildConfig, pkgdest: PathBuf) -> Self {
        Self {
            spawner,
            config,
            pkgdest,
            envs: Vec::new(),
            user: None,
        }
    }

    /// Extra environment for the build process.
    pub fn with_env(mut self, key: impl ToString, value: impl ToString) -> Self {
        self.envs.push((key.to_string(), value.to_string()));
        self
    }

    /// Runs builds as `user`, which must own the source directory and the package destination.
    pub fn with_user(self, user: Option<TargetUser>) -> Self {
        Self { user, ..self }
    }

    fn command(&self, source_dir: &Path, result_file: &BuildResultFile) -> BuildCommand {
        let mut args = vec![
            "-c".to_string(),
            BUILD_SHIM.to_string(),
            BUILD_SHIM_NAME.to_string(),
            result_file.path().to_string_lossy().into_owned(),
            self.config.makepkg.to_string_lossy().into_owned(),
        ];
        args.extend(self.config.args.iter().cloned());

        let mut envs = vec![(
            "PKGDEST".to_string(),
            self.pkgdest.to_string_lossy().into_owned(),
        )];
        envs.extend(self.envs.iter().cloned());

        BuildCommand {
            program: self.config.shell.clone(),
            args,
            current_dir: source_dir.to_path_buf(),
            envs,
            user: self.user.clone(),
        }
    }
}

impl<S> PackageBuilder for MakepkgBuilder<S>
where
    S: ProcessSpawner,
{
    #[instrument(skip_all, fields(source_dir = %source_dir.display()), name = "build")]
    fn build(&self, source_dir: &Path) -> Result<Vec<PathBuf>, BuildError> {
        let result_file = BuildResultFile::create(self.user.as_ref())?;
        let command = self.command(source_dir, &result_file);

        info!("Building package");
        let mut child = self.spawner.spawn(command).map_err(BuildError::Spawn)?;
        let status = child.wait().map_err(BuildError::Wait)?;
        let artifacts = result_file.collect(status)?;
        debug!(count = artifacts.len(), "Build finished");
        Ok(artifacts)
    }
}

/// Private file the build appends produced package paths to. Removed when dropped.
pub struct BuildResultFile(NamedTempFile);

impl BuildResultFile {
    pub fn create(user: Option<&TargetUser>) -> Result<Self, BuildError> {
        let file = tempfile::Builder::new()
            .prefix("maw-build-")
            .tempfile()
            .map_err(BuildError::ResultFile)?;
        give_to(file.path(), user).map_err(BuildError::ResultFile)?;
        Ok(Self(file))
    }

    pub fn path(&self) -> &Path {
        self.0.path()
    }

    /// Reads the reported packages once the build exited with `status`. Anything reported by a
    /// failed build is discarded.
    pub fn collect(self, status: ExitStatus) -> Result<Vec<PathBuf>, BuildError> {
        if !status.success() {
            return Err(match status.code() {
                Some(code) => BuildError::Failed(code),
                None => BuildError::Killed(status.signal().unwrap_or_default()),
            });
        }
        let content = fs::read_to_string(self.path()).map_err(BuildError::ReadResult)?;
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(PathBuf::from)
            .collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Mutex;
    use tempfile::{TempDir, tempdir};

    /// Build tool double: builds `<name>` and `<name>-docs` when the source directory holds a
    /// PKGBUILD, exits with `exit_code` afterwards.
    pub(crate) fn fake_makepkg(dir: &Path, name: &str, exit_code: i32) -> PathBuf {
        let script = format!(
            r#"#!/bin/sh
if [ "$1" = "--packagelist" ]; then
    echo "$PKGDEST/{name}-1.0-1-any.pkg.tar.zst"
    echo "$PKGDEST/{name}-docs-1.0-1-any.pkg.tar.zst"
    echo "$PKGDEST/{name}-never-built-1.0-1-any.pkg.tar.zst"
    exit 0
fi
[ -f PKGBUILD ] || exit 2
touch "$PKGDEST/{name}-1.0-1-any.pkg.tar.zst" "$PKGDEST/{name}-docs-1.0-1-any.pkg.tar.zst"
exit {exit_code}
"#
        );
        let path = dir.join(format!("makepkg-{name}"));
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    pub(crate) fn test_build_config(makepkg: PathBuf) -> BuildConfig {
        BuildConfig {
            shell: PathBuf::from(BUILD_SHELL),
            makepkg,
            args: vec!["-f".to_string()],
        }
    }

    /// Spawns directly while keeping every command it was asked to run.
    #[derive(Default)]
    struct RecordingSpawner(Mutex<Vec<BuildCommand>>);

    impl ProcessSpawner for &RecordingSpawner {
        fn spawn(&self, command: BuildCommand) -> io::Result<Child> {
            self.0.lock().unwrap().push(command.clone());
            command.to_command().spawn()
        }
    }

    struct Fixture {
        dir: TempDir,
        source_dir: PathBuf,
        pkgdest: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let source_dir = dir.path().join("foo");
        let pkgdest = dir.path().join("pkg");
        fs::create_dir(&source_dir).unwrap();
        fs::create_dir(&pkgdest).unwrap();
        fs::write(source_dir.join("PKGBUILD"), "pkgname=foo\n").unwrap();
        Fixture {
            dir,
            source_dir,
            pkgdest,
        }
    }

    #[test]
    fn test_build_reports_produced_packages_in_order() {
        let fixture = fixture();
        let makepkg = fake_makepkg(fixture.dir.path(), "foo", 0);
        let spawner = RecordingSpawner::default();
        let builder = MakepkgBuilder::new(&spawner, test_build_config(makepkg), fixture.pkgdest.clone())
            .with_env("PACMAN", "/usr/bin/maw");

        let artifacts = builder.build(&fixture.source_dir).unwrap();

        assert_eq!(
            artifacts,
            vec![
                fixture.pkgdest.join("foo-1.0-1-any.pkg.tar.zst"),
                fixture.pkgdest.join("foo-docs-1.0-1-any.pkg.tar.zst"),
            ]
        );
        let commands = spawner.0.lock().unwrap();
        let command = &commands[0];
        assert_eq!(command.current_dir, fixture.source_dir);
        assert!(command.envs.contains(&("PACMAN".to_string(), "/usr/bin/maw".to_string())));
        assert_eq!(command.args.last().unwrap(), "-f");
        // the result channel is removed once the build is over
        assert!(!Path::new(&command.args[3]).exists());
    }

    #[test]
    fn test_failed_build_discards_reported_packages() {
        let fixture = fixture();
        let makepkg = fake_makepkg(fixture.dir.path(), "foo", 4);
        let spawner = RecordingSpawner::default();
        let builder = MakepkgBuilder::new(&spawner, test_build_config(makepkg), fixture.pkgdest.clone());

        assert_matches!(builder.build(&fixture.source_dir), Err(BuildError::Failed(4)));
        let commands = spawner.0.lock().unwrap();
        assert!(!Path::new(&commands[0].args[3]).exists());
    }

    #[test]
    fn test_successful_build_without_packages() {
        let fixture = fixture();
        let dir = fixture.dir.path();
        let makepkg = dir.join("makepkg-nothing");
        fs::write(&makepkg, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(&makepkg, fs::Permissions::from_mode(0o755)).unwrap();
        let builder = MakepkgBuilder::new(DirectSpawner, test_build_config(makepkg), fixture.pkgdest.clone());

        assert!(builder.build(&fixture.source_dir).unwrap().is_empty());
    }

    #[test]
    fn test_spawn_failure() {
        let fixture = fixture();
        let mut spawner = MockProcessSpawner::new();
        spawner
            .expect_spawn()
            .once()
            .returning(|_| Err(io::Error::from(io::ErrorKind::PermissionDenied)));
        let builder = MakepkgBuilder::new(
            spawner,
            test_build_config(PathBuf::from("makepkg")),
            fixture.pkgdest.clone(),
        );

        assert_matches!(builder.build(&fixture.source_dir), Err(BuildError::Spawn(_)));
    }

    #[test]
    fn test_collect_ignores_partial_output_of_failed_build() {
        let result_file = BuildResultFile::create(None).unwrap();
        fs::write(result_file.path(), "/pkg/partial.pkg.tar.zst\n").unwrap();

        let status = ExitStatus::from_raw(1 << 8);
        assert_matches!(result_file.collect(status), Err(BuildError::Failed(1)));
    }

    #[test]
    fn test_collect_killed_build() {
        let result_file = BuildResultFile::create(None).unwrap();
        let status = ExitStatus::from_raw(9);
        assert_matches!(result_file.collect(status), Err(BuildError::Killed(9)));
    }

    #[test]
    fn test_collect_skips_blank_lines() {
        let result_file = BuildResultFile::create(None).unwrap();
        fs::write(result_file.path(), "/pkg/a.pkg.tar.zst\n\n/pkg/b.pkg.tar.zst\n").unwrap();

        let artifacts = result_file.collect(ExitStatus::from_raw(0)).unwrap();
        assert_eq!(
            artifacts,
            vec![PathBuf::from("/pkg/a.pkg.tar.zst"), PathBuf::from("/pkg/b.pkg.tar.zst")]
        );
    }
}
