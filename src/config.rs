use std::path::PathBuf;

/// Configuration for Docker-based task execution.
///
/// Tasks run by the `docker` driver are sandboxed with these defaults unless
/// the task's own resources override them.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Docker image used when the task config does not name one
    pub image: String,
    /// Disable network access in container
    pub network_disabled: bool,
    /// Memory limit (e.g., "256m")
    pub memory_limit: Option<String>,
    /// CPU limit (e.g., "0.5" for half a CPU)
    pub cpu_limit: Option<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: "alpine:latest".to_string(),
            network_disabled: true,
            memory_limit: Some("256m".to_string()),
            cpu_limit: Some("0.5".to_string()),
        }
    }
}

/// Client agent configuration shared by every task runner on the node.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Root directory for durable task runner snapshots.
    pub state_dir: PathBuf,
    /// Root directory under which allocation working directories live.
    pub alloc_dir: PathBuf,
    pub sandbox: SandboxConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("/var/lib/nomad-lite/state"),
            alloc_dir: PathBuf::from("/var/lib/nomad-lite/alloc"),
            sandbox: SandboxConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_alloc_dir(mut self, alloc_dir: impl Into<PathBuf>) -> Self {
        self.alloc_dir = alloc_dir.into();
        self
    }

    pub fn with_sandbox(mut self, sandbox: SandboxConfig) -> Self {
        self.sandbox = sandbox;
        self
    }
}
