//! Privileged spawning of build processes.
//!
//! Builds of a privilege-separated run are started by the supervisor main loop: fetch threads
//! ask through [SupervisorSpawner], the loop starts the process with [BuildLauncher], which wires
//! the control pipe and the secret into it so that the build can reach back as a worker.
use super::message::Secret;
use crate::defaults::{CONTROL_PIPE_FD, SECRET_ENV_VAR};
use crate::event::SupervisorEvent;
use crate::event::channel::{EventPublisher, oneshot};
use crate::package::builder::{BuildCommand, ProcessSpawner};
use nix::fcntl::{FcntlArg, FdFlag, fcntl};
use nix::unistd::dup2;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::process::Child;
use tracing::debug;

/// Delegates process spawning to the supervisor main loop.
pub struct SupervisorSpawner {
    publisher: EventPublisher<SupervisorEvent>,
}

impl SupervisorSpawner {
    pub fn new(publisher: EventPublisher<SupervisorEvent>) -> Self {
        Self { publisher }
    }
}

impl ProcessSpawner for SupervisorSpawner {
    fn spawn(&self, command: BuildCommand) -> io::Result<Child> {
        let (reply, response) = oneshot();
        self.publisher
            .publish(SupervisorEvent::SpawnRequested { command, reply })
            .map_err(io::Error::other)?;
        response
            .recv()
            .map_err(|_| io::Error::other("supervisor stopped before starting the build"))?
    }
}

/// Starts build processes with the control pipe on [CONTROL_PIPE_FD] and the run secret in
/// their environment.
pub struct BuildLauncher {
    pipe: OwnedFd,
    secret: Secret,
}

impl BuildLauncher {
    pub fn new(pipe: OwnedFd, secret: Secret) -> Self {
        Self { pipe, secret }
    }

    pub fn spawn(&self, command: &BuildCommand) -> io::Result<Child> {
        debug!(program = %command.program.display(), dir = %command.current_dir.display(), "Starting build");
        let mut process = command.to_command();
        process.env(SECRET_ENV_VAR, self.secret.as_str());
        let fd = self.pipe.as_raw_fd();
        // SAFETY: the closure only issues async-signal-safe syscalls.
        unsafe {
            process.pre_exec(move || inherit_as_control_pipe(fd));
        }
        process.spawn()
    }
}

/// Places `fd` on [CONTROL_PIPE_FD] and keeps it open across exec.
fn inherit_as_control_pipe(fd: RawFd) -> io::Result<()> {
    if fd == CONTROL_PIPE_FD {
        fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty()))?;
    } else {
        dup2(fd, CONTROL_PIPE_FD)?;
    }
    Ok(())
}
