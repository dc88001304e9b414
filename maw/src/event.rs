pub mod channel;

use crate::event::channel::EventPublisher;
use crate::fetch::FetchError;
use crate::ipc::message::Message;
use crate::package::builder::BuildCommand;
use nix::unistd::Pid;
use std::io;
use std::path::PathBuf;
use std::process::Child;

#[derive(Clone, Debug, PartialEq)]
pub enum ApplicationEvent {
    StopRequested,
}

/// A privileged operation on the package database.
#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    Install { targets: Vec<String>, as_deps: bool },
    Remove { targets: Vec<String> },
}

/// Who waits for the outcome of a privileged operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Requester {
    /// The supervisor's own invocation.
    Local,
    Worker(Pid),
}

/// Everything the supervisor main loop consumes, in the order it was published.
pub enum SupervisorEvent {
    /// An authenticated message read from the control pipe.
    MessageReceived(Message),
    /// Request of the supervisor's own invocation.
    LocalRequested(Request),
    /// Resolution of the packages of an install request finished.
    PackagesFetched {
        requester: Requester,
        as_deps: bool,
        result: Result<Vec<PathBuf>, FetchError>,
    },
    /// A build must be started by the supervisor, the spawned process is sent back on `reply`.
    SpawnRequested {
        command: BuildCommand,
        reply: EventPublisher<io::Result<Child>>,
    },
}
