mod backend;
mod error;
mod logging;
mod orchestrator;
mod probe;
mod render;
mod runner;
mod settings;
mod supervisor;
#[cfg(test)]
mod testing;

use backend::FastCgiBackend;
use clap::{ArgAction, Parser, Subcommand};
use error::SupervisorError;
use orchestrator::Orchestrator;
use probe::SystemProbe;
use runner::RealCommandRunner;
use serde::Serialize;
use serde_json::json;
use settings::Settings;
use std::env;
use std::path::PathBuf;
use supervisor::{ProxySupervisor, SupervisorPaths};

#[derive(Parser, Debug)]
#[command(
    name = "webpair",
    version,
    about = "Runs nginx and its FastCGI backend for a local project"
)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory served as the document root (defaults to the current directory).
    #[arg(long, global = true)]
    project_root: Option<PathBuf>,
    #[arg(long, global = true)]
    json: bool,
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start nginx, then the backend it forwards to.
    Start,
    /// Stop the backend, then nginx.
    Stop,
    /// Forget a stale nginx PID file.
    Clean,
}

#[derive(Debug, Serialize)]
struct JsonResult<T: Serialize> {
    ok: bool,
    result: Option<T>,
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exit_code: Option<i32>,
}

#[derive(Debug, Clone)]
struct Context {
    paths: SupervisorPaths,
    settings: Settings,
    json: bool,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let json = cli.json;

    let result = build_context(&cli).and_then(|ctx| {
        let probe = SystemProbe;
        let runner = RealCommandRunner;
        let backend = FastCgiBackend::new(&ctx.settings, &probe, &runner);
        let supervisor = ProxySupervisor::new(&ctx.paths, &ctx.settings, &probe, &runner);
        let stack = Orchestrator::new(supervisor, &backend);
        match cli.command {
            Commands::Start => handle_start(&ctx, &stack),
            Commands::Stop => handle_stop(&ctx, &stack),
            Commands::Clean => handle_clean(&ctx, &stack),
        }
    });

    if let Err(err) = result {
        let code = err.exit_code();
        if json {
            let payload = JsonResult::<serde_json::Value> {
                ok: false,
                result: None,
                error: Some(err.to_string()),
                exit_code: Some(code),
            };
            if print_json(&payload).is_err() {
                eprintln!("{err}");
            }
        } else {
            eprintln!("{err}");
        }
        std::process::exit(code);
    }
}

fn build_context(cli: &Cli) -> Result<Context, SupervisorError> {
    let project_root = match &cli.project_root {
        Some(path) => path.clone(),
        None => env::current_dir()?,
    };
    let project_root = project_root.canonicalize().map_err(|err| {
        SupervisorError::Config(format!(
            "project root {} is not usable: {err}",
            project_root.display()
        ))
    })?;
    let (settings, settings_path) = settings::load_settings(cli.config.as_deref(), &project_root)?;
    let work_dir = settings.work_dir(&project_root);
    tracing::debug!(
        project_root = %project_root.display(),
        work_dir = %work_dir.display(),
        settings = ?settings_path,
        "resolved context"
    );
    Ok(Context {
        paths: SupervisorPaths::new(project_root, work_dir),
        settings,
        json: cli.json,
    })
}

fn handle_start<B: backend::Backend>(
    ctx: &Context,
    stack: &Orchestrator<'_, SystemProbe, RealCommandRunner, B>,
) -> Result<(), SupervisorError> {
    let report = stack.start()?;
    if ctx.json {
        return output(json!(report));
    }
    let pid = report.proxy.usable_pid().unwrap_or_default();
    if report.already_running() {
        println!("nginx is already running (PID {pid})");
    } else {
        println!(
            "nginx started (PID {pid}) on http://{}:{}",
            ctx.settings.proxy.server_name, ctx.settings.proxy.listen_port
        );
    }
    println!("backend running (PID {})", report.backend_pid);
    Ok(())
}

fn handle_stop<B: backend::Backend>(
    ctx: &Context,
    stack: &Orchestrator<'_, SystemProbe, RealCommandRunner, B>,
) -> Result<(), SupervisorError> {
    let report = stack.stop()?;
    if !report.proxy.stopped() {
        return Err(SupervisorError::Process(format!(
            "nginx is not running (no live process recorded in {})",
            ctx.paths.pid_file.display()
        )));
    }
    if ctx.json {
        return output(json!(report));
    }
    println!("nginx stop issued");
    Ok(())
}

fn handle_clean<B: backend::Backend>(
    ctx: &Context,
    stack: &Orchestrator<'_, SystemProbe, RealCommandRunner, B>,
) -> Result<(), SupervisorError> {
    let outcome = stack.clean()?;
    if let Some(error) = outcome.failure() {
        return Err(SupervisorError::Process(format!(
            "failed to remove {}: {error}",
            ctx.paths.pid_file.display()
        )));
    }
    if ctx.json {
        return output(json!({"pid_file": ctx.paths.pid_file, "clean": outcome}));
    }
    println!("clean");
    Ok(())
}

fn output(payload: serde_json::Value) -> Result<(), SupervisorError> {
    let wrapper = JsonResult {
        ok: true,
        result: Some(payload),
        error: None,
        exit_code: None,
    };
    print_json(&wrapper)
}

fn print_json<T: Serialize>(payload: &T) -> Result<(), SupervisorError> {
    let text = serde_json::to_string_pretty(payload)?;
    println!("{}", text);
    Ok(())
}
