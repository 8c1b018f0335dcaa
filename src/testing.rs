//! Test doubles for the process table and command launching.

use crate::probe::{Installation, ProcessProbe};
use crate::runner::{CommandOutput, CommandRunner};
use crate::settings::Settings;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Default settings with millisecond polling so tests don't sleep for seconds.
pub fn fast_settings() -> Settings {
    let mut settings = Settings::default();
    settings.startup.poll_interval_ms = 1;
    settings.startup.stop_interval_ms = 1;
    settings
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

/// What the next `spawn_detached` call does.
#[derive(Debug, Clone)]
pub enum SpawnPlan {
    /// Behaves like a daemonizing proxy: writes `pid` to `pid_file` and
    /// shows up in the process table as `name`.
    WritePidFile {
        pid_file: PathBuf,
        pid: u32,
        name: String,
    },
    /// The child itself stays alive under `name`.
    Live { name: String },
    /// Launch succeeds, then nothing observable happens.
    Silent,
    Fail(io::ErrorKind),
}

/// In-memory process table that also records launched commands.
pub struct FakeSystem {
    installation: Option<Installation>,
    processes: RefCell<BTreeMap<u32, String>>,
    spawn_plans: RefCell<VecDeque<SpawnPlan>>,
    run_outputs: RefCell<VecDeque<CommandOutput>>,
    kill_on_run: RefCell<Vec<u32>>,
    spawns: RefCell<Vec<RecordedCall>>,
    runs: RefCell<Vec<RecordedCall>>,
    terminated: RefCell<Vec<u32>>,
    next_pid: Cell<u32>,
}

impl Default for FakeSystem {
    fn default() -> Self {
        Self {
            installation: None,
            processes: RefCell::new(BTreeMap::new()),
            spawn_plans: RefCell::new(VecDeque::new()),
            run_outputs: RefCell::new(VecDeque::new()),
            kill_on_run: RefCell::new(Vec::new()),
            spawns: RefCell::new(Vec::new()),
            runs: RefCell::new(Vec::new()),
            terminated: RefCell::new(Vec::new()),
            next_pid: Cell::new(7000),
        }
    }
}

impl FakeSystem {
    /// A system where `nginx` lives at `/opt/nginx/sbin/nginx`.
    pub fn with_installation() -> Self {
        Self {
            installation: Some(Installation {
                root: PathBuf::from("/opt/nginx"),
                binary: PathBuf::from("/opt/nginx/sbin/nginx"),
            }),
            ..Self::default()
        }
    }

    pub fn plan_spawn(&self, plan: SpawnPlan) {
        self.spawn_plans.borrow_mut().push_back(plan);
    }

    pub fn set_alive(&self, pid: u32, name: &str) {
        self.processes.borrow_mut().insert(pid, name.to_string());
    }

    /// The next `run` call (the proxy's stop command) takes `pid` down.
    pub fn kill_on_run(&self, pid: u32) {
        self.kill_on_run.borrow_mut().push(pid);
    }

    pub fn queue_run_output(&self, status_code: i32, stderr: &str) {
        self.run_outputs.borrow_mut().push_back(CommandOutput {
            status_code,
            stdout: Vec::new(),
            stderr: stderr.as_bytes().to_vec(),
        });
    }

    pub fn live_processes(&self) -> Vec<(u32, String)> {
        self.processes
            .borrow()
            .iter()
            .map(|(pid, name)| (*pid, name.clone()))
            .collect()
    }

    pub fn spawns(&self) -> Vec<RecordedCall> {
        self.spawns.borrow().clone()
    }

    pub fn runs(&self) -> Vec<RecordedCall> {
        self.runs.borrow().clone()
    }

    pub fn terminated(&self) -> Vec<u32> {
        self.terminated.borrow().clone()
    }

    fn allocate_pid(&self) -> u32 {
        let pid = self.next_pid.get();
        self.next_pid.set(pid + 1);
        pid
    }
}

impl ProcessProbe for FakeSystem {
    fn locate_executable(&self, _name: &str) -> Option<Installation> {
        self.installation.clone()
    }

    fn is_alive(&self, process_name: &str, pid: Option<u32>) -> bool {
        let Some(pid) = pid.filter(|pid| *pid > 0) else {
            return false;
        };
        self.processes
            .borrow()
            .get(&pid)
            .map(|name| name == process_name)
            .unwrap_or(false)
    }

    fn terminate(&self, pid: u32) -> bool {
        self.terminated.borrow_mut().push(pid);
        self.processes.borrow_mut().remove(&pid).is_some()
    }
}

impl CommandRunner for FakeSystem {
    fn spawn_detached(&self, program: &Path, args: &[String], cwd: &Path) -> Result<u32, io::Error> {
        self.spawns.borrow_mut().push(RecordedCall {
            program: program.to_path_buf(),
            args: args.to_vec(),
            cwd: cwd.to_path_buf(),
        });
        let plan = self
            .spawn_plans
            .borrow_mut()
            .pop_front()
            .unwrap_or(SpawnPlan::Silent);
        let child = self.allocate_pid();
        match plan {
            SpawnPlan::WritePidFile {
                pid_file,
                pid,
                name,
            } => {
                fs::write(&pid_file, format!("{pid}\n"))?;
                self.set_alive(pid, &name);
            }
            SpawnPlan::Live { name } => self.set_alive(child, &name),
            SpawnPlan::Silent => {}
            SpawnPlan::Fail(kind) => return Err(io::Error::new(kind, "spawn failed")),
        }
        Ok(child)
    }

    fn run(&self, program: &Path, args: &[String], cwd: &Path) -> Result<CommandOutput, io::Error> {
        self.runs.borrow_mut().push(RecordedCall {
            program: program.to_path_buf(),
            args: args.to_vec(),
            cwd: cwd.to_path_buf(),
        });
        for pid in self.kill_on_run.borrow_mut().drain(..) {
            self.processes.borrow_mut().remove(&pid);
        }
        Ok(self
            .run_outputs
            .borrow_mut()
            .pop_front()
            .unwrap_or(CommandOutput {
                status_code: 0,
                stdout: Vec::new(),
                stderr: Vec::new(),
            }))
    }
}
