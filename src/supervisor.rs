//! Proxy lifecycle: start, stop and clean against a per-project work dir.
//!
//! The PID file is written by the proxy itself and is the only state shared
//! between invocations. Nothing here trusts it blindly: a PID only counts when
//! the process table agrees it belongs to a live proxy.

use crate::error::SupervisorError;
use crate::probe::{read_pid, Installation, ProcessProbe, ProcessState};
use crate::render::render;
use crate::runner::{render_command, CommandRunner};
use crate::settings::Settings;
use fs4::FileExt;
use serde::Serialize;
use std::env;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;

pub const CONFIG_FILE_NAME: &str = "nginx.conf";
pub const PID_FILE_NAME: &str = "nginx.pid";
pub const BACKEND_PID_FILE_NAME: &str = "backend.pid";
pub const LOCK_FILE_NAME: &str = "webpair.lock";
pub const LOGS_DIR_NAME: &str = "logs";

/// Windows reports a held `LockFileEx` range as ERROR_LOCK_VIOLATION.
#[cfg(windows)]
const ERROR_LOCK_VIOLATION: i32 = 33;

/// Where one invocation keeps its generated artifacts. Rebuilt every run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorPaths {
    pub project_root: PathBuf,
    pub work_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub config_file: PathBuf,
    pub pid_file: PathBuf,
    pub backend_pid_file: PathBuf,
    pub lock_file: PathBuf,
}

impl SupervisorPaths {
    pub fn new(project_root: PathBuf, work_dir: PathBuf) -> Self {
        Self {
            logs_dir: work_dir.join(LOGS_DIR_NAME),
            config_file: work_dir.join(CONFIG_FILE_NAME),
            pid_file: work_dir.join(PID_FILE_NAME),
            backend_pid_file: work_dir.join(BACKEND_PID_FILE_NAME),
            lock_file: work_dir.join(LOCK_FILE_NAME),
            project_root,
            work_dir,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StartOutcome {
    Started { pid: u32, attempts: u32 },
    /// A live proxy already owns the PID file; nothing was spawned.
    AlreadyRunning { pid: u32 },
    /// The proxy was launched but never reported a live PID.
    TimedOut { last_pid: Option<u32>, attempts: u32 },
}

impl StartOutcome {
    pub fn usable_pid(&self) -> Option<u32> {
        match self {
            Self::Started { pid, .. } | Self::AlreadyRunning { pid } => Some(*pid),
            Self::TimedOut { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StopOutcome {
    NotRunning,
    /// The stop command was sent. `confirmed` is true once the recorded PID
    /// no longer maps to a live proxy; the proxy shuts down asynchronously,
    /// so false is possible even on a clean shutdown.
    Issued {
        pid: Option<u32>,
        confirmed: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        stop_exit_code: Option<i32>,
    },
}

impl StopOutcome {
    pub fn stopped(&self) -> bool {
        matches!(self, Self::Issued { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CleanOutcome {
    Removed,
    Absent,
    Failed { error: String },
}

impl CleanOutcome {
    /// Why the PID file couldn't be removed, if it couldn't.
    pub fn failure(&self) -> Option<&str> {
        match self {
            Self::Failed { error } => Some(error),
            Self::Removed | Self::Absent => None,
        }
    }
}

/// Held for the duration of a verb; the OS drops the lock with the handle.
#[derive(Debug)]
pub struct SupervisorLock {
    _file: File,
}

pub struct ProxySupervisor<'a, P, R> {
    paths: &'a SupervisorPaths,
    settings: &'a Settings,
    probe: &'a P,
    runner: &'a R,
}

impl<'a, P: ProcessProbe, R: CommandRunner> ProxySupervisor<'a, P, R> {
    pub fn new(paths: &'a SupervisorPaths, settings: &'a Settings, probe: &'a P, runner: &'a R) -> Self {
        Self {
            paths,
            settings,
            probe,
            runner,
        }
    }

    pub fn paths(&self) -> &SupervisorPaths {
        self.paths
    }

    pub fn state(&self) -> ProcessState {
        ProcessState::observe(self.probe, &self.settings.proxy.process_name, &self.paths.pid_file)
    }

    pub fn ensure_directories(&self) -> Result<(), SupervisorError> {
        for dir in [&self.paths.work_dir, &self.paths.logs_dir] {
            if !dir.exists() {
                fs::create_dir_all(dir).map_err(|err| {
                    io::Error::new(
                        err.kind(),
                        format!("failed to create {}: {err}", dir.display()),
                    )
                })?;
                tracing::info!(dir = %dir.display(), "created directory");
            }
        }
        Ok(())
    }

    /// Takes the advisory lock. Returns `None` when the work dir doesn't
    /// exist yet, since there is nothing on disk to race over.
    pub fn lock(&self) -> Result<Option<SupervisorLock>, SupervisorError> {
        if !self.paths.work_dir.is_dir() {
            return Ok(None);
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.paths.lock_file)?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Some(SupervisorLock { _file: file })),
            Err(err) if is_lock_contended(&err) => {
                Err(SupervisorError::Locked(self.paths.lock_file.clone()))
            }
            Err(err) => Err(SupervisorError::Io(err)),
        }
    }

    pub fn start(&self) -> Result<StartOutcome, SupervisorError> {
        self.ensure_directories()?;

        let state = self.state();
        if let (true, Some(pid)) = (state.is_alive, state.pid) {
            tracing::info!(pid, "proxy is already running");
            return Ok(StartOutcome::AlreadyRunning { pid });
        }
        if state.is_stale() {
            tracing::warn!(
                pid = ?state.pid,
                pid_file = %self.paths.pid_file.display(),
                "ignoring stale PID file"
            );
        }

        let installation = self.resolve_installation()?;
        tracing::info!(
            binary = %installation.binary.display(),
            root = %installation.root.display(),
            "located proxy"
        );
        self.write_config(&installation)?;

        let args = self.proxy_args(false);
        let command = render_command(&installation.binary, &args);
        let child = self
            .runner
            .spawn_detached(&installation.binary, &args, &self.paths.work_dir)
            .map_err(|err| {
                SupervisorError::Process(format!("failed to launch `{command}`: {err}"))
            })?;
        tracing::info!(command = %command, child, "launched proxy");

        Ok(self.wait_for_pid())
    }

    pub fn stop(&self) -> Result<StopOutcome, SupervisorError> {
        let state = self.state();
        if !state.pid_file_exists {
            tracing::info!(pid_file = %self.paths.pid_file.display(), "no PID file; nothing to stop");
            return Ok(StopOutcome::NotRunning);
        }
        // nginx signals whatever PID the file holds, so a reused PID must
        // never reach the stop command.
        if state.is_stale() {
            tracing::warn!(
                pid = ?state.pid,
                pid_file = %self.paths.pid_file.display(),
                "stale PID file left alone; run `clean` to remove it"
            );
            return Ok(StopOutcome::NotRunning);
        }
        let pid = state.pid;

        let installation = self.resolve_installation()?;
        if !self.paths.config_file.exists() {
            // The stop signal is routed through the config's pid directive.
            self.write_config(&installation)?;
        }

        let args = self.proxy_args(true);
        let command = render_command(&installation.binary, &args);
        let output = self
            .runner
            .run(&installation.binary, &args, &self.paths.work_dir)
            .map_err(|err| {
                SupervisorError::Process(format!("failed to run `{command}`: {err}"))
            })?;
        let stop_exit_code = if output.success() {
            tracing::info!(command = %command, "issued proxy stop");
            None
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            tracing::warn!(
                command = %command,
                status = output.status_code,
                stderr = %stderr,
                stdout = %stdout,
                "proxy stop command failed"
            );
            Some(output.status_code)
        };

        let confirmed = self.wait_for_exit(pid);
        if !confirmed {
            tracing::warn!(pid = ?pid, "proxy still running after stop was issued");
        }
        Ok(StopOutcome::Issued {
            pid,
            confirmed,
            stop_exit_code,
        })
    }

    pub fn clean(&self) -> CleanOutcome {
        let state = self.state();
        if state.is_alive {
            tracing::warn!(pid = ?state.pid, "removing PID file of a live proxy");
        }
        match fs::remove_file(&self.paths.pid_file) {
            Ok(()) => {
                tracing::info!(pid_file = %self.paths.pid_file.display(), "removed PID file");
                CleanOutcome::Removed
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => CleanOutcome::Absent,
            Err(err) => {
                tracing::warn!(pid_file = %self.paths.pid_file.display(), error = %err, "failed to remove PID file");
                CleanOutcome::Failed {
                    error: err.to_string(),
                }
            }
        }
    }

    fn resolve_installation(&self) -> Result<Installation, SupervisorError> {
        let executable = &self.settings.proxy.executable;
        if let Some(root) = self.settings.install_override() {
            return installation_in_root(&root, executable).ok_or_else(|| {
                SupervisorError::NotFound(format!(
                    "`{executable}` under {} (check proxy.install_path)",
                    root.display()
                ))
            });
        }
        self.probe.locate_executable(executable).ok_or_else(|| {
            SupervisorError::NotFound(format!(
                "`{executable}` on PATH; make sure your PATH is correct or set proxy.install_path"
            ))
        })
    }

    fn write_config(&self, installation: &Installation) -> Result<(), SupervisorError> {
        let content = render(
            &self.settings.endpoints(),
            &installation.root,
            &self.paths.project_root,
            &self.paths.work_dir,
            &self.paths.pid_file,
        );
        fs::write(&self.paths.config_file, content).map_err(|err| {
            io::Error::new(
                err.kind(),
                format!("failed to write {}: {err}", self.paths.config_file.display()),
            )
        })?;
        tracing::info!(config = %self.paths.config_file.display(), "wrote proxy config");
        Ok(())
    }

    fn proxy_args(&self, stop: bool) -> Vec<String> {
        let mut args = vec![
            "-c".to_string(),
            self.paths.config_file.to_string_lossy().to_string(),
        ];
        if stop {
            args.push("-s".to_string());
            args.push("stop".to_string());
        }
        args.push("-p".to_string());
        args.push(self.paths.work_dir.to_string_lossy().to_string());
        args
    }

    fn wait_for_pid(&self) -> StartOutcome {
        let name = &self.settings.proxy.process_name;
        let attempts = self.settings.startup.poll_attempts;
        let interval = self.settings.startup.poll_interval();
        let mut last_pid = None;
        for attempt in 1..=attempts {
            thread::sleep(interval);
            last_pid = read_pid(&self.paths.pid_file);
            tracing::debug!(attempt, pid = ?last_pid, "polled PID file");
            if let Some(pid) = last_pid.filter(|pid| self.probe.is_alive(name, Some(*pid))) {
                return StartOutcome::Started {
                    pid,
                    attempts: attempt,
                };
            }
        }
        tracing::warn!(
            attempts,
            pid_file = %self.paths.pid_file.display(),
            "couldn't find the proxy PID; the PID file never appeared"
        );
        StartOutcome::TimedOut { last_pid, attempts }
    }

    fn wait_for_exit(&self, pid: Option<u32>) -> bool {
        let name = &self.settings.proxy.process_name;
        let interval = self.settings.startup.stop_interval();
        for _ in 0..self.settings.startup.stop_attempts {
            if !self.probe.is_alive(name, pid) {
                return true;
            }
            thread::sleep(interval);
        }
        !self.probe.is_alive(name, pid)
    }
}

/// Finds the proxy binary inside an explicitly configured install root.
fn installation_in_root(root: &Path, executable: &str) -> Option<Installation> {
    let file_name = if executable.ends_with(env::consts::EXE_SUFFIX) {
        executable.to_string()
    } else {
        format!("{executable}{}", env::consts::EXE_SUFFIX)
    };
    [
        root.join(&file_name),
        root.join("sbin").join(&file_name),
        root.join("bin").join(&file_name),
    ]
    .into_iter()
    .find(|candidate| candidate.is_file())
    .map(|binary| Installation {
        root: root.to_path_buf(),
        binary,
    })
}

fn is_lock_contended(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }
    #[cfg(windows)]
    if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION) {
        return true;
    }
    false
}
