//! The privileged side of the control plane.
//!
//! [Supervisor::run] consumes every [SupervisorEvent] from a single loop: worker messages, its own
//! invocation's request, completed fetches and build spawns. Install and removal operations run
//! from that loop only, so they never overlap and execute in the order they were requested.
use super::message::{Action, Message};
use super::notify::{Notification, WorkerNotifier};
use super::spawner::BuildLauncher;
use crate::defaults::WORKER_PROBE_INTERVAL;
use crate::event::channel::{EventConsumer, EventPublisher};
use crate::event::{ApplicationEvent, Request, Requester, SupervisorEvent};
use crate::fetch::BatchFetcher;
use crate::operations::OperationError;
use crate::pacman::manager::PackageManager;
use crate::utils::threads::spawn_named_thread;
use crossbeam::channel::tick;
use crossbeam::select;
use nix::unistd::Pid;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("interrupted, running workers were terminated")]
    Interrupted,
    #[error("supervisor event channel closed")]
    ChannelClosed,
    #[error(transparent)]
    Operation(#[from] OperationError),
}

pub struct Supervisor {
    executor: Executor,
    events: EventConsumer<SupervisorEvent>,
    application_events: EventConsumer<ApplicationEvent>,
    probe_interval: Duration,
}

/// Supervisor state, only ever touched from the main loop.
struct Executor {
    launcher: BuildLauncher,
    fetcher: Arc<dyn BatchFetcher>,
    package_manager: Arc<dyn PackageManager>,
    notifier: Arc<dyn WorkerNotifier>,
    publisher: EventPublisher<SupervisorEvent>,
    workers: HashSet<Pid>,
    fetches_in_flight: usize,
    local_pending: bool,
    local_outcome: Option<Result<(), OperationError>>,
}

impl Supervisor {
    pub fn new(
        launcher: BuildLauncher,
        fetcher: Arc<dyn BatchFetcher>,
        package_manager: Arc<dyn PackageManager>,
        notifier: Arc<dyn WorkerNotifier>,
        (publisher, events): (EventPublisher<SupervisorEvent>, EventConsumer<SupervisorEvent>),
        application_events: EventConsumer<ApplicationEvent>,
    ) -> Self {
        Self {
            executor: Executor {
                launcher,
                fetcher,
                package_manager,
                notifier,
                publisher,
                workers: HashSet::new(),
                fetches_in_flight: 0,
                local_pending: false,
                local_outcome: None,
            },
            events,
            application_events,
            probe_interval: WORKER_PROBE_INTERVAL,
        }
    }

    /// Sets how often tracked workers are checked for an exit without goodbye.
    pub fn with_probe_interval(self, probe_interval: Duration) -> Self {
        Self {
            probe_interval,
            ..self
        }
    }

    /// Runs until its own request is answered and every worker left, or a stop is requested.
    /// Returns the outcome of the supervisor's own request, if it had one.
    pub fn run(self) -> Result<(), SupervisorError> {
        let Self {
            mut executor,
            events,
            application_events,
            probe_interval,
        } = self;
        let probe = tick(probe_interval);

        debug!("Supervisor started");
        loop {
            select! {
                recv(events.as_ref()) -> event => {
                    // the executor holds a publisher, so the channel stays connected
                    let Ok(event) = event else {
                        return Err(SupervisorError::ChannelClosed);
                    };
                    executor.handle(event);
                },
                recv(application_events.as_ref()) -> _ => {
                    info!("Stop requested, terminating workers");
                    executor.terminate_workers();
                    return Err(SupervisorError::Interrupted);
                },
                recv(probe) -> _ => executor.prune_exited_workers(),
            }
            if executor.is_idle() {
                break;
            }
        }

        debug!("Nothing left to supervise");
        Ok(executor.local_outcome.take().unwrap_or(Ok(()))?)
    }
}

impl Executor {
    fn is_idle(&self) -> bool {
        !self.local_pending && self.fetches_in_flight == 0 && self.workers.is_empty()
    }

    fn handle(&mut self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::MessageReceived(message) => self.handle_message(message),
            SupervisorEvent::LocalRequested(request) => {
                self.local_pending = true;
                self.execute(Requester::Local, request);
            }
            SupervisorEvent::PackagesFetched {
                requester,
                as_deps,
                result,
            } => {
                self.fetches_in_flight = self.fetches_in_flight.saturating_sub(1);
                let result = result
                    .map_err(OperationError::from)
                    .and_then(|artifacts| self.install(&artifacts, as_deps));
                self.complete(requester, result);
            }
            SupervisorEvent::SpawnRequested { command, reply } => {
                let _ = reply
                    .publish(self.launcher.spawn(&command))
                    .inspect_err(|err| warn!(%err, "Build requester is gone"));
            }
        }
    }

    fn handle_message(&mut self, message: Message) {
        let Message {
            pid,
            action,
            params,
            ..
        } = message;
        match action {
            Action::Hello => {
                if self.workers.insert(pid) {
                    info!(%pid, "Worker started");
                }
            }
            _ if !self.workers.contains(&pid) => {
                warn!(%pid, action = action.as_str(), "Ignoring message from an unknown worker");
            }
            Action::Goodbye => {
                self.workers.remove(&pid);
                info!(%pid, "Worker exited");
            }
            // requests from workers come from build dependency resolution
            Action::Install => self.execute(
                Requester::Worker(pid),
                Request::Install {
                    targets: params,
                    as_deps: true,
                },
            ),
            Action::Remove => {
                self.execute(Requester::Worker(pid), Request::Remove { targets: params })
            }
        }
    }

    fn execute(&mut self, requester: Requester, request: Request) {
        match request {
            Request::Install { targets, as_deps } => self.start_fetch(requester, targets, as_deps),
            Request::Remove { targets } => {
                let result = self.remove(&targets);
                self.complete(requester, result);
            }
        }
    }

    /// Resolves the packages outside of the main loop, which must stay free to spawn the builds
    /// the resolution needs. The install itself is queued back as [SupervisorEvent::PackagesFetched].
    fn start_fetch(&mut self, requester: Requester, targets: Vec<String>, as_deps: bool) {
        if targets.is_empty() {
            self.complete(requester, Ok(()));
            return;
        }
        self.fetches_in_flight += 1;
        let fetcher = self.fetcher.clone();
        let publisher = self.publisher.clone();
        spawn_named_thread("supervisor-fetch", move || {
            let result = fetcher.fetch_all(&targets);
            let _ = publisher
                .publish(SupervisorEvent::PackagesFetched {
                    requester,
                    as_deps,
                    result,
                })
                .inspect_err(|err| warn!(%err, "Supervisor is gone, dropping fetch result"));
        });
    }

    fn install(&self, artifacts: &[PathBuf], as_deps: bool) -> Result<(), OperationError> {
        if artifacts.is_empty() {
            return Ok(());
        }
        Ok(self.package_manager.install(artifacts, as_deps)?)
    }

    fn remove(&self, targets: &[String]) -> Result<(), OperationError> {
        if targets.is_empty() {
            return Ok(());
        }
        Ok(self.package_manager.remove(targets)?)
    }

    fn complete(&mut self, requester: Requester, result: Result<(), OperationError>) {
        match requester {
            Requester::Local => {
                self.local_pending = false;
                self.local_outcome = Some(result);
            }
            Requester::Worker(pid) => {
                if let Err(err) = &result {
                    warn!(%pid, %err, "Worker request failed");
                }
                let _ = self
                    .notifier
                    .notify(pid, Notification::from_result(&result))
                    .inspect_err(|err| warn!(%err, "Could not answer worker"));
            }
        }
    }

    fn terminate_workers(&self) {
        for pid in &self.workers {
            let _ = self
                .notifier
                .notify(*pid, Notification::Terminate)
                .inspect_err(|err| warn!(%err, "Could not terminate worker"));
        }
    }

    fn prune_exited_workers(&mut self) {
        let notifier = &self.notifier;
        self.workers.retain(|pid| {
            let alive = notifier.is_alive(*pid);
            if !alive {
                info!(%pid, "Worker exited without goodbye");
            }
            alive
        });
    }
}
