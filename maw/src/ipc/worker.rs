//! Worker side of the control plane.
//!
//! A worker announces itself once detected, delegates each privileged request to the supervisor
//! and blocks until the supervisor acknowledges it with [Signal::SIGUSR1] (success) or
//! [Signal::SIGUSR2] (failure). Both signals are blocked before the first request is written, so
//! an acknowledgement that arrives before the worker starts waiting stays pending instead of
//! being lost or killing the process.
use super::message::{Action, MessageWriter, Secret};
use crate::defaults::{CONTROL_PIPE_FD, SECRET_ENV_VAR};
use nix::errno::Errno;
use nix::fcntl::{FcntlArg, FdFlag, fcntl};
use nix::sys::signal::{SigSet, Signal};
use nix::unistd::getpid;
use std::env;
use std::fs::File;
use std::io;
use std::os::fd::FromRawFd;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("invalid control pipe: {0}")]
    ControlPipe(Errno),
    #[error("could not block notification signals: {0}")]
    SignalMask(Errno),
    #[error("could not reach the supervisor: {0}")]
    Send(io::Error),
    #[error("failed waiting for the supervisor: {0}")]
    Wait(Errno),
    #[error("supervisor reported the request as failed")]
    Rejected,
    #[error("unexpected signal {0} while waiting for the supervisor")]
    UnexpectedSignal(Signal),
}

/// Connection of a worker process to its supervisor. Says goodbye when dropped.
pub struct Worker {
    writer: Mutex<MessageWriter<File>>,
    signals: SigSet,
}

impl Worker {
    /// Returns a connected worker when the process was started by a supervisor, that is when it
    /// carries the run secret and inherited the control pipe.
    ///
    /// Must run before the process starts any thread, so that every thread inherits the
    /// blocked acknowledgement signals.
    pub fn detect() -> Result<Option<Self>, WorkerError> {
        let Ok(secret) = env::var(SECRET_ENV_VAR) else {
            return Ok(None);
        };
        match fcntl(CONTROL_PIPE_FD, FcntlArg::F_GETFD) {
            Ok(_) => {}
            Err(Errno::EBADF) => {
                warn!("Run secret found without a control pipe, running standalone");
                return Ok(None);
            }
            Err(err) => return Err(WorkerError::ControlPipe(err)),
        }
        // the pipe must not leak into the package manager or nested builds
        fcntl(CONTROL_PIPE_FD, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
            .map_err(WorkerError::ControlPipe)?;
        // SAFETY: the descriptor is open and nothing else in this process owns it.
        let pipe = unsafe { File::from_raw_fd(CONTROL_PIPE_FD) };
        Self::connect(pipe, Secret::from(secret)).map(Some)
    }

    /// Blocks the acknowledgement signals on the calling thread and announces the worker.
    pub(crate) fn connect(pipe: File, secret: Secret) -> Result<Self, WorkerError> {
        let signals = acknowledgement_signals();
        signals.thread_block().map_err(WorkerError::SignalMask)?;
        let mut writer = MessageWriter::new(pipe, getpid(), secret);
        writer.send(Action::Hello, &[]).map_err(WorkerError::Send)?;
        debug!("Connected to the supervisor");
        Ok(Self {
            writer: Mutex::new(writer),
            signals,
        })
    }

    /// Sends a request and waits for its acknowledgement. Requests of one worker never overlap.
    pub fn request(&self, action: Action, params: &[String]) -> Result<(), WorkerError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.send(action, params).map_err(WorkerError::Send)?;
        debug!(action = action.as_str(), "Waiting for the supervisor");
        match self.signals.wait().map_err(WorkerError::Wait)? {
            Signal::SIGUSR1 => Ok(()),
            Signal::SIGUSR2 => Err(WorkerError::Rejected),
            other => Err(WorkerError::UnexpectedSignal(other)),
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let writer = self.writer.get_mut().unwrap_or_else(PoisonError::into_inner);
        let _ = writer
            .send(Action::Goodbye, &[])
            .inspect_err(|err| warn!(%err, "Could not say goodbye to the supervisor"));
    }
}

fn acknowledgement_signals() -> SigSet {
    let mut signals = SigSet::empty();
    signals.add(Signal::SIGUSR1);
    signals.add(Signal::SIGUSR2);
    signals
}
