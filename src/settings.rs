use crate::error::SupervisorError;
use crate::render::{Endpoints, DEFAULT_BACKEND_ADDRESS, DEFAULT_LISTEN_PORT, DEFAULT_SERVER_NAME};
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "WEBPAIR_CONFIG";
pub const CONFIG_DIR_ENV: &str = "WEBPAIR_CONFIG_DIR";
pub const PROJECT_CONFIG_FILE: &str = "webpair.yaml";
const SUPPORTED_VERSION: u32 = 1;

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub version: u32,
    pub proxy: ProxySettings,
    pub backend: BackendSettings,
    pub paths: PathSettings,
    pub startup: StartupSettings,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct ProxySettings {
    pub executable: String,
    pub process_name: String,
    pub install_path: String,
    pub listen_port: u16,
    pub server_name: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct BackendSettings {
    pub command: String,
    /// Empty means `-b <address>`.
    pub args: Vec<String>,
    pub process_name: String,
    pub address: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct PathSettings {
    pub work_dir: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct StartupSettings {
    pub poll_attempts: u32,
    pub poll_interval_ms: u64,
    pub stop_attempts: u32,
    pub stop_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SUPPORTED_VERSION,
            proxy: ProxySettings::default(),
            backend: BackendSettings::default(),
            paths: PathSettings::default(),
            startup: StartupSettings::default(),
        }
    }
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            executable: "nginx".to_string(),
            process_name: "nginx".to_string(),
            install_path: "".to_string(),
            listen_port: DEFAULT_LISTEN_PORT,
            server_name: DEFAULT_SERVER_NAME.to_string(),
        }
    }
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            command: "php-cgi".to_string(),
            args: Vec::new(),
            process_name: "php-cgi".to_string(),
            address: DEFAULT_BACKEND_ADDRESS.to_string(),
        }
    }
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            work_dir: ".tmp/nginx".to_string(),
        }
    }
}

impl Default for StartupSettings {
    fn default() -> Self {
        Self {
            poll_attempts: 10,
            poll_interval_ms: 500,
            stop_attempts: 10,
            stop_interval_ms: 200,
        }
    }
}

impl Settings {
    pub fn endpoints(&self) -> Endpoints {
        Endpoints {
            listen_port: self.proxy.listen_port,
            server_name: self.proxy.server_name.clone(),
            backend_address: self.backend.address.clone(),
        }
    }

    /// Relative work dirs live under the project root.
    pub fn work_dir(&self, project_root: &Path) -> PathBuf {
        let expanded = PathBuf::from(expand_path(&self.paths.work_dir));
        if expanded.is_absolute() {
            expanded
        } else {
            project_root.join(expanded)
        }
    }

    pub fn install_override(&self) -> Option<PathBuf> {
        let trimmed = self.proxy.install_path.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(PathBuf::from(expand_path(trimmed)))
        }
    }
}

impl BackendSettings {
    /// Arguments the backend is launched with.
    pub fn launch_args(&self) -> Vec<String> {
        if self.args.is_empty() {
            vec!["-b".to_string(), self.address.clone()]
        } else {
            self.args.clone()
        }
    }

    /// The address passed with `-b`, if the explicit args bind one.
    fn bound_address(&self) -> Option<&str> {
        self.args
            .iter()
            .position(|arg| arg == "-b")
            .and_then(|index| self.args.get(index + 1))
            .map(String::as_str)
    }
}

impl StartupSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_interval(&self) -> Duration {
        Duration::from_millis(self.stop_interval_ms)
    }
}

pub fn read_settings_from_str(content: &str) -> Result<Settings, SupervisorError> {
    let settings: Settings = serde_yaml::from_str(content)?;
    validate_settings(&settings)?;
    Ok(settings)
}

pub fn read_settings(path: &Path) -> Result<Settings, SupervisorError> {
    let content = fs::read_to_string(path).map_err(|err| {
        SupervisorError::Config(format!("failed to read {}: {err}", path.display()))
    })?;
    read_settings_from_str(&content).map_err(|err| {
        SupervisorError::Config(format!(
            "{} is invalid; fix it and retry ({err})",
            path.display()
        ))
    })
}

fn validate_settings(settings: &Settings) -> Result<(), SupervisorError> {
    if settings.version != SUPPORTED_VERSION {
        return Err(SupervisorError::Config(format!(
            "unsupported config version {}",
            settings.version
        )));
    }
    if settings.proxy.executable.trim().is_empty() {
        return Err(SupervisorError::Config(
            "proxy.executable must not be empty".to_string(),
        ));
    }
    if settings.proxy.process_name.trim().is_empty() {
        return Err(SupervisorError::Config(
            "proxy.process_name must not be empty".to_string(),
        ));
    }
    if settings.backend.command.trim().is_empty() {
        return Err(SupervisorError::Config(
            "backend.command must not be empty".to_string(),
        ));
    }
    if settings.backend.address.trim().is_empty() {
        return Err(SupervisorError::Config(
            "backend.address must not be empty".to_string(),
        ));
    }
    if let Some(bound) = settings.backend.bound_address() {
        if bound != settings.backend.address {
            return Err(SupervisorError::Config(format!(
                "backend.args binds {bound} but nginx forwards to backend.address {}",
                settings.backend.address
            )));
        }
    }
    if settings.paths.work_dir.trim().is_empty() {
        return Err(SupervisorError::Config(
            "paths.work_dir must not be empty".to_string(),
        ));
    }
    if settings.startup.poll_attempts == 0 {
        return Err(SupervisorError::Config(
            "startup.poll_attempts must be at least 1".to_string(),
        ));
    }
    if settings.startup.stop_attempts == 0 {
        return Err(SupervisorError::Config(
            "startup.stop_attempts must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Loads settings, falling back to defaults when no file is found.
/// Returns the file actually read, if any.
pub fn load_settings(
    override_path: Option<&Path>,
    project_root: &Path,
) -> Result<(Settings, Option<PathBuf>), SupervisorError> {
    let env_path = env::var(CONFIG_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from);
    let path = resolve_settings_path(override_path, env_path, project_root, &default_config_dir())?;
    match path {
        Some(path) => {
            let settings = read_settings(&path)?;
            tracing::debug!(path = %path.display(), "loaded settings");
            Ok((settings, Some(path)))
        }
        None => Ok((Settings::default(), None)),
    }
}

fn resolve_settings_path(
    override_path: Option<&Path>,
    env_path: Option<PathBuf>,
    project_root: &Path,
    config_dir: &Path,
) -> Result<Option<PathBuf>, SupervisorError> {
    if let Some(explicit) = override_path.map(Path::to_path_buf).or(env_path) {
        if !explicit.exists() {
            return Err(SupervisorError::Config(format!(
                "config file {} does not exist",
                explicit.display()
            )));
        }
        return Ok(Some(explicit));
    }
    let project_file = project_root.join(PROJECT_CONFIG_FILE);
    if project_file.exists() {
        return Ok(Some(project_file));
    }
    let user_file = config_dir.join("config.yaml");
    if user_file.exists() {
        return Ok(Some(user_file));
    }
    Ok(None)
}

fn default_config_dir() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_DIR_ENV) {
        return PathBuf::from(path);
    }
    let mut base = home_dir().unwrap_or_else(|| PathBuf::from("."));
    base.push(".config");
    base.push("webpair");
    base
}

pub fn expand_path(input: &str) -> String {
    if let Some(stripped) = input.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(stripped).to_string_lossy().to_string();
        }
    }
    input.to_string()
}
