use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use thiserror::Error;

/// Out-of-band notifications the supervisor sends to workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    Succeeded,
    Failed,
    Terminate,
}

impl From<Notification> for Signal {
    fn from(value: Notification) -> Signal {
        match value {
            Notification::Succeeded => Signal::SIGUSR1,
            Notification::Failed => Signal::SIGUSR2,
            Notification::Terminate => Signal::SIGTERM,
        }
    }
}

impl Notification {
    pub fn from_result<T, E>(result: &Result<T, E>) -> Self {
        if result.is_ok() {
            Notification::Succeeded
        } else {
            Notification::Failed
        }
    }
}

#[derive(Error, Debug)]
#[error("could not notify process {pid}: {source}")]
pub struct NotifyError {
    pid: Pid,
    source: Errno,
}

#[cfg_attr(test, mockall::automock)]
pub trait WorkerNotifier: Send + Sync {
    fn notify(&self, pid: Pid, notification: Notification) -> Result<(), NotifyError>;
    /// Checks whether `pid` still refers to a running process.
    fn is_alive(&self, pid: Pid) -> bool;
}

/// Notifies workers through process signals.
pub struct SignalNotifier;

impl WorkerNotifier for SignalNotifier {
    fn notify(&self, pid: Pid, notification: Notification) -> Result<(), NotifyError> {
        kill(pid, Signal::from(notification)).map_err(|source| NotifyError { pid, source })
    }

    fn is_alive(&self, pid: Pid) -> bool {
        // EPERM still means the process exists
        !matches!(kill(pid, None), Err(Errno::ESRCH))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::process::Command;

    #[rstest]
    #[case::succeeded(Notification::Succeeded, Signal::SIGUSR1)]
    #[case::failed(Notification::Failed, Signal::SIGUSR2)]
    #[case::terminate(Notification::Terminate, Signal::SIGTERM)]
    fn test_notification_signal(#[case] notification: Notification, #[case] signal: Signal) {
        assert_eq!(Signal::from(notification), signal);
    }

    #[test]
    fn test_from_result() {
        assert_eq!(Notification::from_result(&Ok::<(), ()>(())), Notification::Succeeded);
        assert_eq!(Notification::from_result(&Err::<(), ()>(())), Notification::Failed);
    }

    #[test]
    fn test_terminate_and_liveness() {
        let mut child = Command::new("sleep").arg("10").spawn().unwrap();
        let pid = Pid::from_raw(child.id() as i32);
        assert!(SignalNotifier.is_alive(pid));

        SignalNotifier.notify(pid, Notification::Terminate).unwrap();
        child.wait().unwrap();
        assert!(!SignalNotifier.is_alive(pid));
    }
}
