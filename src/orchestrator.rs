//! Sequences the proxy and its backend for each verb.
//!
//! The proxy is useless without its backend, so a start that can't bring the
//! backend up stops the proxy again before reporting failure.

use crate::backend::Backend;
use crate::error::SupervisorError;
use crate::probe::ProcessProbe;
use crate::runner::CommandRunner;
use crate::supervisor::{CleanOutcome, ProxySupervisor, StartOutcome, StopOutcome};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartReport {
    pub proxy: StartOutcome,
    pub backend_pid: u32,
}

impl StartReport {
    pub fn already_running(&self) -> bool {
        matches!(self.proxy, StartOutcome::AlreadyRunning { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopReport {
    pub proxy: StopOutcome,
    pub backend_stopped: bool,
}

pub struct Orchestrator<'a, P, R, B> {
    supervisor: ProxySupervisor<'a, P, R>,
    backend: &'a B,
}

impl<'a, P: ProcessProbe, R: CommandRunner, B: Backend> Orchestrator<'a, P, R, B> {
    pub fn new(supervisor: ProxySupervisor<'a, P, R>, backend: &'a B) -> Self {
        Self {
            supervisor,
            backend,
        }
    }

    pub fn start(&self) -> Result<StartReport, SupervisorError> {
        self.supervisor.ensure_directories()?;
        let _lock = self.supervisor.lock()?;

        let proxy = self.supervisor.start()?;
        let Some(proxy_pid) = proxy.usable_pid() else {
            self.roll_back_proxy();
            let attempts = match proxy {
                StartOutcome::TimedOut { attempts, .. } => attempts,
                _ => 0,
            };
            return Err(SupervisorError::Process(format!(
                "proxy did not report a live PID after {attempts} attempts; check {}",
                self.supervisor.paths().logs_dir.join("error.log").display()
            )));
        };

        match self.backend.start(self.supervisor.paths()) {
            Ok(backend_pid) => {
                tracing::info!(proxy_pid, backend_pid, "stack is up");
                Ok(StartReport { proxy, backend_pid })
            }
            Err(err) => {
                tracing::warn!(error = %err, "backend failed to start; the proxy relies on it");
                self.roll_back_proxy();
                Err(match err {
                    SupervisorError::BackendFailed(_) => err,
                    other => SupervisorError::BackendFailed(other.to_string()),
                })
            }
        }
    }

    pub fn stop(&self) -> Result<StopReport, SupervisorError> {
        let _lock = self.supervisor.lock()?;
        // A backend that won't stop must not keep the proxy up.
        let backend_stopped = self.backend.stop(self.supervisor.paths());
        let proxy = self.supervisor.stop()?;
        Ok(StopReport {
            proxy,
            backend_stopped,
        })
    }

    pub fn clean(&self) -> Result<CleanOutcome, SupervisorError> {
        let _lock = self.supervisor.lock()?;
        Ok(self.supervisor.clean())
    }

    fn roll_back_proxy(&self) {
        match self.supervisor.stop() {
            Ok(outcome) => tracing::warn!(?outcome, "rolled back proxy"),
            Err(err) => tracing::warn!(error = %err, "proxy rollback failed"),
        }
    }
}
