use async_trait::async_trait;
use tokio::process::Command;

use crate::driver::process::ProcessHandle;
use crate::driver::{Driver, DriverHandle, ExecContext};
use crate::error::{NomadError, Result};
use crate::structs::Task;

/// Runs a task as a plain host process.
///
/// Task config:
/// - `command`: program to run (required)
/// - `args`: whitespace separated arguments
#[derive(Debug, Clone, Default)]
pub struct ExecDriver;

impl ExecDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Driver for ExecDriver {
    fn name(&self) -> &str {
        "exec"
    }

    async fn start(&self, ctx: &ExecContext, task: &Task) -> Result<Box<dyn DriverHandle>> {
        let program = task
            .config
            .get("command")
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                NomadError::InvalidTaskConfig(format!(
                    "missing 'command' for task '{}'",
                    task.name
                ))
            })?;

        let mut command = Command::new(program);
        if let Some(args) = task.config.get("args") {
            command.args(args.split_whitespace());
        }

        let handle = ProcessHandle::spawn("exec", command, ctx, task).await?;
        tracing::info!(
            task = %task.name,
            alloc_id = %ctx.alloc_id,
            handle = %handle.id(),
            command = %program,
            "Started exec task"
        );
        Ok(Box::new(handle))
    }
}
