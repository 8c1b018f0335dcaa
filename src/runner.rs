use std::io;
use std::path::Path;
use std::process::{Command, Stdio};

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == 0
    }
}

/// Launches external programs. Substituted with a recording fake in tests.
pub trait CommandRunner {
    /// Starts `program` in the background and returns its PID without
    /// waiting for it.
    fn spawn_detached(&self, program: &Path, args: &[String], cwd: &Path) -> Result<u32, io::Error>;

    /// Runs `program` to completion, capturing its output.
    fn run(&self, program: &Path, args: &[String], cwd: &Path) -> Result<CommandOutput, io::Error>;
}

pub struct RealCommandRunner;

impl CommandRunner for RealCommandRunner {
    fn spawn_detached(&self, program: &Path, args: &[String], cwd: &Path) -> Result<u32, io::Error> {
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(cwd);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());
        detach(&mut cmd);
        let child = cmd.spawn()?;
        Ok(child.id())
    }

    fn run(&self, program: &Path, args: &[String], cwd: &Path) -> Result<CommandOutput, io::Error> {
        let output = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .output()?;
        let status_code = output
            .status
            .code()
            .unwrap_or(if output.status.success() { 0 } else { 1 });
        Ok(CommandOutput {
            status_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

#[cfg(unix)]
fn detach(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    // Own process group so a Ctrl-C aimed at us doesn't reach the child.
    cmd.process_group(0);
}

#[cfg(windows)]
fn detach(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn detach(_cmd: &mut Command) {}

pub fn render_command(program: &Path, args: &[String]) -> String {
    fn shell_quote(part: &str) -> String {
        if part.is_empty() {
            return "\"\"".to_string();
        }
        if part.chars().any(|c| c.is_whitespace()) {
            return format!("\"{}\"", part.replace('"', "\\\""));
        }
        part.to_string()
    }
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(shell_quote(&program.to_string_lossy()));
    parts.extend(args.iter().map(|arg| shell_quote(arg)));
    parts.join(" ")
}
