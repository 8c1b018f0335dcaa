//! Process table and executable lookups.
//!
//! Everything that asks the OS about processes goes through [`ProcessProbe`]
//! so the supervisor can run against a fake in tests. PID files are plain
//! files and are read directly.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, Signal, System};

/// Linux truncates `comm` to 15 bytes.
const COMM_NAME_LIMIT: usize = 15;

/// A located proxy installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installation {
    /// Root holding `conf/` and `temp/`; what the renderer needs.
    pub root: PathBuf,
    /// The executable itself, symlinks resolved.
    pub binary: PathBuf,
}

pub trait ProcessProbe {
    fn locate_executable(&self, name: &str) -> Option<Installation>;

    /// True only when `pid` is a positive PID of a live process whose image
    /// name matches `process_name`.
    fn is_alive(&self, process_name: &str, pid: Option<u32>) -> bool;

    /// Asks the process to exit. Returns false when it couldn't be signalled.
    fn terminate(&self, pid: u32) -> bool;
}

/// Snapshot of what the PID file and the process table say right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessState {
    pub pid_file_exists: bool,
    pub pid: Option<u32>,
    pub is_alive: bool,
}

impl ProcessState {
    pub fn observe<P: ProcessProbe>(probe: &P, process_name: &str, pid_file: &Path) -> Self {
        let pid_file_exists = pid_file.exists();
        let pid = if pid_file_exists { read_pid(pid_file) } else { None };
        let is_alive = probe.is_alive(process_name, pid);
        Self {
            pid_file_exists,
            pid,
            is_alive,
        }
    }

    /// A PID file that doesn't point at a live matching process.
    pub fn is_stale(&self) -> bool {
        self.pid_file_exists && !self.is_alive
    }
}

/// Reads a PID file. Missing, empty and unparsable files all yield `None`.
pub fn read_pid(path: &Path) -> Option<u32> {
    let text = fs::read_to_string(path).ok()?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<u32>().ok()
}

/// Strips the binary (and a trailing `bin`/`sbin` directory) off an
/// executable path.
pub fn install_root_from_binary(binary: &Path) -> Option<PathBuf> {
    let parent = binary.parent()?;
    if parent.as_os_str().is_empty() {
        return None;
    }
    match parent.file_name().and_then(|name| name.to_str()) {
        Some("sbin") | Some("bin") => parent.parent().map(Path::to_path_buf),
        _ => Some(parent.to_path_buf()),
    }
}

pub fn process_name_matches(actual: &OsStr, expected: &str) -> bool {
    fn normalize(name: &str) -> String {
        let lower = name.trim().to_ascii_lowercase();
        match lower.strip_suffix(".exe") {
            Some(stripped) => stripped.to_string(),
            None => lower,
        }
    }
    let actual = normalize(&actual.to_string_lossy());
    let expected = normalize(expected);
    if actual.is_empty() || expected.is_empty() {
        return false;
    }
    if actual == expected {
        return true;
    }
    actual.len() == COMM_NAME_LIMIT && expected.starts_with(&actual)
}

/// Probe backed by PATH lookup and the live process table.
pub struct SystemProbe;

impl ProcessProbe for SystemProbe {
    fn locate_executable(&self, name: &str) -> Option<Installation> {
        let candidates = match which::which_all(name) {
            Ok(found) => found.collect::<Vec<_>>(),
            Err(err) => {
                tracing::debug!(executable = name, error = %err, "executable lookup failed");
                return None;
            }
        };
        let mut installations: Vec<Installation> = Vec::new();
        for candidate in candidates {
            let binary = fs::canonicalize(&candidate).unwrap_or(candidate);
            let Some(root) = install_root_from_binary(&binary) else {
                continue;
            };
            if installations.iter().all(|known| known.root != root) {
                installations.push(Installation { root, binary });
            }
        }
        match installations.len() {
            0 => None,
            1 => installations.pop(),
            _ => {
                let roots: Vec<String> = installations
                    .iter()
                    .map(|found| found.root.display().to_string())
                    .collect();
                tracing::warn!(
                    executable = name,
                    roots = %roots.join(", "),
                    "executable found in several installations; set proxy.install_path to pick one"
                );
                None
            }
        }
    }

    fn is_alive(&self, process_name: &str, pid: Option<u32>) -> bool {
        let Some(pid) = pid.filter(|pid| *pid > 0) else {
            return false;
        };
        let pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::new(),
        );
        match system.process(pid) {
            Some(process) => {
                process.status() != ProcessStatus::Zombie
                    && process_name_matches(process.name(), process_name)
            }
            None => false,
        }
    }

    fn terminate(&self, pid: u32) -> bool {
        if pid == 0 {
            return false;
        }
        let pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::new(),
        );
        match system.process(pid) {
            Some(process) => process
                .kill_with(Signal::Term)
                .unwrap_or_else(|| process.kill()),
            None => false,
        }
    }
}
