//! Per-task execution supervisor.
//!
//! A [`TaskRunner`] owns exactly one task of an allocation. The allocation
//! spawns [`TaskRunner::run`] as its own tokio task and talks to it through a
//! [`TaskRunnerHandle`]:
//!
//! - **Updates** go through a bounded inbox and are dropped when it is full
//! - **Destroy** is a one-shot signal; the first request wins
//! - **Completion** is observed with [`TaskRunnerHandle::wait`]
//!
//! # Lifecycle
//!
//! ```text
//! Created -> Starting -> Running -> { completed | failed | killed } -> Done
//!                 \-> failed to start -------------------------------/
//! ```
//!
//! Only the control loop in `run` writes the task or touches the driver
//! handle. Callers only ever enqueue intents, so the loop needs no lock
//! around the task.
//!
//! # Restart recovery
//!
//! [`TaskRunner::restore_state`] restores the task specification only. No
//! driver handle is reattached; calling `run` afterwards starts the task
//! fresh, and deciding whether to do so is left to the allocation.

mod signal;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

use crate::alloc::AllocParent;
use crate::config::ClientConfig;
use crate::driver::{DriverHandle, DriverRegistry, ExecContext};
use crate::error::Result;
use crate::state::{self, TaskRunnerState};
use crate::structs::{Task, TaskStatus};

pub use signal::{DestroySignal, UPDATE_CHANNEL_CAPACITY};
use signal::CompletionGuard;

/// Supervises one task: starts it through its driver, forwards updates,
/// kills it on destroy and reports status to the allocation.
pub struct TaskRunner {
    config: Arc<ClientConfig>,
    parent: Arc<dyn AllocParent>,
    ctx: ExecContext,
    alloc_id: String,
    task: Task,
    drivers: DriverRegistry,
    update_rx: mpsc::Receiver<Task>,
    task_tx: watch::Sender<Task>,
    handle: TaskRunnerHandle,
    // Dropped last, after any state cleanup in `run`.
    _completion: CompletionGuard,
}

impl TaskRunner {
    pub fn new(
        config: Arc<ClientConfig>,
        parent: Arc<dyn AllocParent>,
        ctx: ExecContext,
        task: Task,
    ) -> Self {
        let alloc_id = parent.alloc_id().to_string();
        let (update_tx, update_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let (task_tx, task_rx) = watch::channel(task.clone());
        let (completion, done_rx) = CompletionGuard::new();

        let handle = TaskRunnerHandle {
            alloc_id: alloc_id.clone(),
            state_dir: config.state_dir.clone(),
            update_tx,
            destroy: Arc::new(DestroySignal::new()),
            task_rx,
            done_rx,
        };

        Self {
            drivers: DriverRegistry::builtin(config.clone()),
            config,
            parent,
            ctx,
            alloc_id,
            task,
            update_rx,
            task_tx,
            handle,
            _completion: completion,
        }
    }

    /// Replace the driver registry used to resolve the task's driver.
    pub fn with_drivers(mut self, drivers: DriverRegistry) -> Self {
        self.drivers = drivers;
        self
    }

    pub fn handle(&self) -> TaskRunnerHandle {
        self.handle.clone()
    }

    pub fn alloc_id(&self) -> &str {
        &self.alloc_id
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn state_file_path(&self) -> PathBuf {
        state::state_file_path(&self.config.state_dir, &self.alloc_id, &self.task.name)
    }

    /// Restore the task specification from a previous snapshot.
    pub async fn restore_state(&mut self) -> Result<()> {
        let snap: TaskRunnerState = state::restore_state(&self.state_file_path()).await?;
        self.task = snap.task;
        self.task_tx.send_replace(self.task.clone());
        tracing::debug!(task = %self.task.name, alloc_id = %self.alloc_id, "Restored task runner state");
        Ok(())
    }

    pub async fn save_state(&self) -> Result<()> {
        let snap = TaskRunnerState {
            task: self.task.clone(),
        };
        state::persist_state(&self.state_file_path(), &snap).await
    }

    pub async fn destroy_state(&self) -> Result<()> {
        state::erase_state(&self.state_file_path()).await
    }

    fn set_status(&self, status: TaskStatus, description: &str) {
        self.parent.set_task_status(&self.task.name, status, description);
    }

    /// Run the task until it exits. Completion is signalled when this returns.
    pub async fn run(mut self) {
        tracing::debug!(
            task = %self.task.name,
            alloc_id = %self.alloc_id,
            "Starting task runner"
        );

        self.run_task().await;

        if self.handle.destroy.is_requested() {
            if let Err(e) = self.destroy_state().await {
                tracing::warn!(
                    task = %self.task.name,
                    alloc_id = %self.alloc_id,
                    error = %e,
                    "Failed to destroy task runner state"
                );
            }
        }
    }

    async fn run_task(&mut self) {
        let driver = match self.drivers.new_driver(&self.task.driver) {
            Ok(driver) => driver,
            Err(e) => {
                tracing::error!(
                    task = %self.task.name,
                    alloc_id = %self.alloc_id,
                    driver = %self.task.driver,
                    error = %e,
                    "Failed to create driver"
                );
                let desc = format!("failed to create driver '{}'", self.task.driver);
                self.set_status(TaskStatus::Failed, &desc);
                return;
            }
        };

        let handle = match driver.start(&self.ctx, &self.task).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(
                    task = %self.task.name,
                    alloc_id = %self.alloc_id,
                    driver = %self.task.driver,
                    error = %e,
                    "Failed to start task"
                );
                self.set_status(TaskStatus::Failed, &format!("failed to start: {}", e));
                return;
            }
        };
        self.set_status(TaskStatus::Running, "task started");

        let mut exit = handle.wait();
        let mut kill_sent = false;

        loop {
            tokio::select! {
                result = &mut exit => {
                    match result {
                        Ok(()) => {
                            tracing::info!(task = %self.task.name, alloc_id = %self.alloc_id, "Task completed");
                            self.set_status(TaskStatus::Dead, "task completed");
                        }
                        Err(e) => {
                            tracing::error!(
                                task = %self.task.name,
                                alloc_id = %self.alloc_id,
                                error = %e,
                                "Task failed"
                            );
                            self.set_status(TaskStatus::Dead, &format!("task failed with: {}", e));
                        }
                    }
                    break;
                }

                Some(update) = self.update_rx.recv() => {
                    self.apply_update(handle.as_ref(), update).await;
                }

                // Kill once, then keep waiting for the driver to report exit
                _ = self.handle.destroy.cancelled(), if !kill_sent => {
                    kill_sent = true;
                    tracing::info!(task = %self.task.name, alloc_id = %self.alloc_id, handle = %handle.id(), "Killing task");
                    if let Err(e) = handle.kill().await {
                        tracing::warn!(
                            task = %self.task.name,
                            alloc_id = %self.alloc_id,
                            error = %e,
                            "Failed to kill task"
                        );
                    }
                }
            }
        }
    }

    async fn apply_update(&mut self, handle: &dyn DriverHandle, update: Task) {
        self.task = update;
        self.task_tx.send_replace(self.task.clone());

        if let Err(e) = handle.update(&self.task).await {
            tracing::warn!(
                task = %self.task.name,
                alloc_id = %self.alloc_id,
                error = %e,
                "Failed to update task"
            );
        }
    }
}

/// Caller side of a [`TaskRunner`]. Cheap to clone; never blocks on the runner.
#[derive(Debug, Clone)]
pub struct TaskRunnerHandle {
    alloc_id: String,
    state_dir: PathBuf,
    update_tx: mpsc::Sender<Task>,
    destroy: Arc<DestroySignal>,
    task_rx: watch::Receiver<Task>,
    done_rx: watch::Receiver<bool>,
}

impl TaskRunnerHandle {
    pub fn alloc_id(&self) -> &str {
        &self.alloc_id
    }

    /// The task as last seen by the control loop.
    pub fn current_task(&self) -> Task {
        self.task_rx.borrow().clone()
    }

    /// Queue a new task specification for the runner.
    ///
    /// Delivery is best effort: when the inbox is full the update is dropped
    /// and logged, and the runner keeps its current task.
    pub fn update(&self, update: Task) {
        match self.update_tx.try_send(update) {
            Ok(()) => {}
            Err(TrySendError::Full(update)) => {
                tracing::warn!(
                    task = %update.name,
                    alloc_id = %self.alloc_id,
                    "Dropping task update, update queue full"
                );
            }
            Err(TrySendError::Closed(update)) => {
                tracing::warn!(
                    task = %update.name,
                    alloc_id = %self.alloc_id,
                    "Dropping task update, task runner has exited"
                );
            }
        }
    }

    /// Ask the runner to kill its task. Only the first call has any effect;
    /// returns whether this call was it.
    pub fn destroy(&self) -> bool {
        let first = self.destroy.request();
        if first {
            tracing::debug!(alloc_id = %self.alloc_id, task = %self.task_rx.borrow().name, "Task destroy requested");
        }
        first
    }

    pub fn is_destroy_requested(&self) -> bool {
        self.destroy.is_requested()
    }

    /// Completion signal; flips to `true` once the runner has fully exited.
    pub fn wait_ch(&self) -> watch::Receiver<bool> {
        self.done_rx.clone()
    }

    pub fn is_finished(&self) -> bool {
        *self.done_rx.borrow()
    }

    /// Wait until the runner has exited and cleaned up.
    pub async fn wait(&self) {
        let mut rx = self.done_rx.clone();
        let _ = rx.wait_for(|done| *done).await;
    }

    pub fn state_file_path(&self) -> PathBuf {
        state::state_file_path(&self.state_dir, &self.alloc_id, &self.task_rx.borrow().name)
    }

    /// Snapshot the task as last seen by the control loop.
    pub async fn save_state(&self) -> Result<()> {
        let snap = TaskRunnerState {
            task: self.current_task(),
        };
        state::persist_state(&self.state_file_path(), &snap).await
    }

    pub async fn destroy_state(&self) -> Result<()> {
        state::erase_state(&self.state_file_path()).await
    }
}
