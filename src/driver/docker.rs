use async_trait::async_trait;
use tokio::process::Command;

use crate::config::SandboxConfig;
use crate::driver::process::ProcessHandle;
use crate::driver::{Driver, DriverHandle, ExecContext};
use crate::error::{NomadError, Result};
use crate::structs::Task;

/// Runs tasks in Docker containers with security isolation.
///
/// All containers are started with:
/// - Network isolation (disabled by default)
/// - Dropped capabilities
/// - Read-only root filesystem
/// - Memory and CPU limits, taken from the task's resources when present
///
/// Task config:
/// - `command`: shell command run with `sh -c` (required)
/// - `image`: image to run, defaults to the sandbox image
#[derive(Debug, Clone)]
pub struct DockerDriver {
    config: SandboxConfig,
}

impl DockerDriver {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Container name for a task; unique per allocation and task.
    pub fn container_name(ctx: &ExecContext, task: &Task) -> String {
        format!("nomad-{}-{}", ctx.alloc_id, task.name)
    }

    /// Arguments passed to `docker` to run `task`.
    pub fn run_args(&self, container: &str, task: &Task) -> Result<Vec<String>> {
        let command = task
            .config
            .get("command")
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                NomadError::InvalidTaskConfig(format!(
                    "missing 'command' for task '{}'",
                    task.name
                ))
            })?;
        let image = task
            .config
            .get("image")
            .cloned()
            .unwrap_or_else(|| self.config.image.clone());

        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            format!("--name={}", container),
        ];

        // Network isolation
        if self.config.network_disabled {
            args.push("--network=none".to_string());
        }

        let resources = task.resources.clone().unwrap_or_default();

        // Memory limit
        match (resources.memory_mb, &self.config.memory_limit) {
            (Some(mb), _) => args.push(format!("--memory={}m", mb)),
            (None, Some(limit)) => args.push(format!("--memory={}", limit)),
            (None, None) => {}
        }

        // CPU limit
        if let Some(limit) = resources.cpu.as_ref().or(self.config.cpu_limit.as_ref()) {
            args.push(format!("--cpus={}", limit));
        }

        // Security: drop all capabilities, no new privileges
        args.push("--cap-drop=ALL".to_string());
        args.push("--security-opt=no-new-privileges".to_string());

        // Read-only root filesystem
        args.push("--read-only".to_string());

        for (key, value) in &task.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }

        args.push(image);
        args.push("sh".to_string());
        args.push("-c".to_string());
        args.push(command.clone());

        Ok(args)
    }
}

#[async_trait]
impl Driver for DockerDriver {
    fn name(&self) -> &str {
        "docker"
    }

    async fn start(&self, ctx: &ExecContext, task: &Task) -> Result<Box<dyn DriverHandle>> {
        let container = Self::container_name(ctx, task);
        let args = self.run_args(&container, task)?;

        let mut command = Command::new("docker");
        command.args(&args);

        let process = ProcessHandle::spawn("docker", command, ctx, task).await?;
        tracing::info!(
            task = %task.name,
            alloc_id = %ctx.alloc_id,
            container = %container,
            "Started docker task"
        );
        Ok(Box::new(DockerHandle { container, process }))
    }
}

struct DockerHandle {
    container: String,
    process: ProcessHandle,
}

#[async_trait]
impl DriverHandle for DockerHandle {
    fn id(&self) -> String {
        format!("docker:{}", self.container)
    }

    async fn wait(&self) -> Result<()> {
        self.process.wait().await
    }

    async fn update(&self, task: &Task) -> Result<()> {
        self.process.update(task).await
    }

    async fn kill(&self) -> Result<()> {
        let output = Command::new("docker")
            .args(["kill", &self.container])
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => Ok(()),
            result => {
                let reason = match result {
                    Ok(output) => String::from_utf8_lossy(&output.stderr).trim().to_string(),
                    Err(e) => e.to_string(),
                };
                // Killing the client at least stops the local process
                self.process.kill().await?;
                Err(NomadError::KillFailed(format!(
                    "docker kill {}: {}",
                    self.container, reason
                )))
            }
        }
    }
}
