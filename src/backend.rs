//! The application server the proxy forwards dynamic requests to.

use crate::error::SupervisorError;
use crate::probe::{read_pid, ProcessProbe};
use crate::runner::{render_command, CommandRunner};
use crate::settings::Settings;
use crate::supervisor::SupervisorPaths;
use std::fs;
use std::io;
use std::path::Path;
use std::thread;

pub trait Backend {
    /// Starts the backend (or finds it already running) and returns its PID.
    fn start(&self, paths: &SupervisorPaths) -> Result<u32, SupervisorError>;

    /// Stops the backend. False when nothing was running or it couldn't be
    /// signalled.
    fn stop(&self, paths: &SupervisorPaths) -> bool;
}

/// A FastCGI server such as `php-cgi -b 127.0.0.1:9123`. It doesn't write
/// its own PID file, so the PID of the launched child is recorded instead.
pub struct FastCgiBackend<'a, P, R> {
    settings: &'a Settings,
    probe: &'a P,
    runner: &'a R,
}

impl<'a, P: ProcessProbe, R: CommandRunner> FastCgiBackend<'a, P, R> {
    pub fn new(settings: &'a Settings, probe: &'a P, runner: &'a R) -> Self {
        Self {
            settings,
            probe,
            runner,
        }
    }

    fn live_pid(&self, pid_file: &Path) -> Option<u32> {
        let pid = read_pid(pid_file);
        if self.probe.is_alive(&self.settings.backend.process_name, pid) {
            pid
        } else {
            None
        }
    }
}

impl<P: ProcessProbe, R: CommandRunner> Backend for FastCgiBackend<'_, P, R> {
    fn start(&self, paths: &SupervisorPaths) -> Result<u32, SupervisorError> {
        let backend = &self.settings.backend;
        if let Some(pid) = self.live_pid(&paths.backend_pid_file) {
            tracing::info!(pid, "backend is already running");
            return Ok(pid);
        }

        let program = Path::new(&backend.command);
        let args = backend.launch_args();
        let command = render_command(program, &args);
        let pid = self
            .runner
            .spawn_detached(program, &args, &paths.project_root)
            .map_err(|err| {
                if err.kind() == io::ErrorKind::NotFound {
                    SupervisorError::BackendFailed(format!(
                        "`{}` was not found; make sure it is on your PATH",
                        backend.command
                    ))
                } else {
                    SupervisorError::BackendFailed(format!("failed to launch `{command}`: {err}"))
                }
            })?;

        // Bind failures make the server exit right away.
        thread::sleep(self.settings.startup.poll_interval());
        if !self.probe.is_alive(&backend.process_name, Some(pid)) {
            return Err(SupervisorError::BackendFailed(format!(
                "`{command}` exited right after launch (is {} already in use?)",
                backend.address
            )));
        }

        fs::write(&paths.backend_pid_file, format!("{pid}\n"))?;
        tracing::info!(pid, command = %command, "launched backend");
        Ok(pid)
    }

    fn stop(&self, paths: &SupervisorPaths) -> bool {
        let Some(pid) = self.live_pid(&paths.backend_pid_file) else {
            if paths.backend_pid_file.exists() {
                tracing::info!(pid_file = %paths.backend_pid_file.display(), "removing stale backend PID file");
                discard_pid_file(&paths.backend_pid_file);
            }
            return false;
        };
        if !self.probe.terminate(pid) {
            tracing::warn!(pid, "couldn't signal backend");
            return false;
        }
        discard_pid_file(&paths.backend_pid_file);
        tracing::info!(pid, "stopped backend");
        true
    }
}

/// Removes a PID file. False when it is still on disk afterwards.
fn discard_pid_file(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(err) if err.kind() == io::ErrorKind::NotFound => true,
        Err(err) => {
            tracing::warn!(pid_file = %path.display(), error = %err, "failed to remove backend PID file");
            false
        }
    }
}
