use std::io;
use std::path::PathBuf;
use thiserror::Error;

// Usage errors exit with clap's status 2.
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_NOT_FOUND: i32 = 3;
pub const EXIT_BACKEND_FAILED: i32 = 4;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("executable not found: {0}")]
    NotFound(String),
    #[error("process error: {0}")]
    Process(String),
    #[error("backend failed to start: {0}")]
    BackendFailed(String),
    #[error("another invocation holds {}; retry once it finishes", .0.display())]
    Locked(PathBuf),
}

impl SupervisorError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound(_) => EXIT_NOT_FOUND,
            Self::BackendFailed(_) => EXIT_BACKEND_FAILED,
            _ => EXIT_FAILURE,
        }
    }
}
