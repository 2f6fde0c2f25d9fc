use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NomadError {
    #[error("Unsupported driver: {0}")]
    UnsupportedDriver(String),

    #[error("Invalid task config: {0}")]
    InvalidTaskConfig(String),

    #[error("Task exited: {0}")]
    TaskExited(String),

    #[error("Failed to kill task: {0}")]
    KillFailed(String),

    #[error("State not found: {}", .0.display())]
    StateNotFound(PathBuf),

    #[error("Corrupt state at {}: {source}", .path.display())]
    CorruptState {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, NomadError>;
