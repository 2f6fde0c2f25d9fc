use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::{mpsc, watch};

use crate::driver::{DriverHandle, ExecContext};
use crate::error::{NomadError, Result};
use crate::structs::Task;

#[derive(Debug, Clone)]
enum ExitOutcome {
    Exited(ExitStatus),
    WaitFailed(String),
}

/// A child process supervised by a background monitor.
///
/// The monitor owns the `Child`; the handle talks to it through channels so
/// `wait`, `update` and `kill` only ever need `&self`. Dropping the handle
/// closes the kill channel, which the monitor treats as a kill request.
pub(crate) struct ProcessHandle {
    id: String,
    exit_rx: watch::Receiver<Option<ExitOutcome>>,
    kill_tx: mpsc::Sender<()>,
}

impl ProcessHandle {
    /// Spawn `command` for `task`, sending its output to files in the task dir.
    pub(crate) async fn spawn(
        prefix: &str,
        mut command: Command,
        ctx: &ExecContext,
        task: &Task,
    ) -> Result<Self> {
        let dir = ctx.task_dir(&task.name)?;
        tokio::fs::create_dir_all(&dir).await?;
        let stdout = tokio::fs::File::create(dir.join(format!("{}.stdout", task.name)))
            .await?
            .into_std()
            .await;
        let stderr = tokio::fs::File::create(dir.join(format!("{}.stderr", task.name)))
            .await?
            .into_std()
            .await;

        command
            .current_dir(&dir)
            .envs(&task.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);

        let mut child = command.spawn()?;
        let id = match child.id() {
            Some(pid) => format!("{}:{}", prefix, pid),
            None => format!("{}:exited", prefix),
        };

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, mut kill_rx) = mpsc::channel::<()>(1);
        let monitor_id = id.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                status = child.wait() => status,
                // A closed channel means the handle is gone
                _ = kill_rx.recv() => {
                    tracing::debug!(handle = %monitor_id, "Killing process");
                    if let Err(e) = child.start_kill() {
                        tracing::warn!(handle = %monitor_id, error = %e, "Failed to signal process");
                    }
                    child.wait().await
                }
            };

            let outcome = match result {
                Ok(status) => ExitOutcome::Exited(status),
                Err(e) => ExitOutcome::WaitFailed(e.to_string()),
            };
            tracing::debug!(handle = %monitor_id, outcome = ?outcome, "Process exited");
            exit_tx.send_replace(Some(outcome));
        });

        Ok(Self {
            id,
            exit_rx,
            kill_tx,
        })
    }

    fn describe(status: ExitStatus) -> String {
        match (status.code(), status.signal()) {
            (Some(code), _) => format!("exit code {}", code),
            (None, Some(signal)) => format!("terminated by signal {}", signal),
            (None, None) => "unknown exit status".to_string(),
        }
    }
}

#[async_trait]
impl DriverHandle for ProcessHandle {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn wait(&self) -> Result<()> {
        let mut rx = self.exit_rx.clone();
        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|outcome| (*outcome).clone());

        match outcome {
            Some(ExitOutcome::Exited(status)) if status.success() => Ok(()),
            Some(ExitOutcome::Exited(status)) => Err(NomadError::TaskExited(Self::describe(status))),
            Some(ExitOutcome::WaitFailed(e)) => Err(NomadError::TaskExited(e)),
            None => Err(NomadError::Internal(format!(
                "process monitor for {} stopped without an exit status",
                self.id
            ))),
        }
    }

    /// A running process cannot be reconfigured; the update is acknowledged
    /// and the process keeps running unchanged.
    async fn update(&self, task: &Task) -> Result<()> {
        tracing::debug!(handle = %self.id, task = %task.name, "Task update acknowledged, process unchanged");
        Ok(())
    }

    async fn kill(&self) -> Result<()> {
        match self.kill_tx.try_send(()) {
            // Full means a kill is already pending; Closed means the monitor
            // already saw the exit.
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(())) => Ok(()),
        }
    }
}
