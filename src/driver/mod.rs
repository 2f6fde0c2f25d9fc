//! Execution drivers.
//!
//! A driver turns a [`Task`] into a running workload and hands back a
//! [`DriverHandle`] that the task runner uses to observe exit, push updates
//! and kill the task.
//!
//! # Built-in drivers
//!
//! - [`ExecDriver`] (`exec`): runs a host process
//! - [`DockerDriver`] (`docker`): runs the task in a sandboxed container
//!
//! Other kinds are added through [`DriverRegistry::register`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ClientConfig;
use crate::error::{NomadError, Result};
use crate::structs::Task;

pub mod docker;
pub mod exec;
mod process;

pub use docker::DockerDriver;
pub use exec::ExecDriver;

/// Execution context shared by the tasks of one allocation.
#[derive(Debug, Clone)]
pub struct ExecContext {
    pub alloc_id: String,
    /// Working directory of the allocation
    pub alloc_dir: PathBuf,
}

impl ExecContext {
    pub fn new(alloc_id: impl Into<String>, alloc_dir: impl Into<PathBuf>) -> Self {
        Self {
            alloc_id: alloc_id.into(),
            alloc_dir: alloc_dir.into(),
        }
    }

    /// Working directory for the named task.
    ///
    /// The name must be a single path component so the directory stays
    /// inside the allocation directory.
    pub fn task_dir(&self, task_name: &str) -> Result<PathBuf> {
        let single_component = !task_name.is_empty()
            && task_name != "."
            && task_name != ".."
            && !task_name.contains(['/', '\\', '\0']);
        if !single_component {
            return Err(NomadError::InvalidTaskConfig(format!(
                "task name '{}' is not a valid directory name",
                task_name.escape_debug()
            )));
        }
        Ok(self.alloc_dir.join(task_name))
    }
}

#[async_trait]
pub trait Driver: Send + Sync {
    fn name(&self) -> &str;

    /// Start the task. The returned handle is the only way to reach it.
    async fn start(&self, ctx: &ExecContext, task: &Task) -> Result<Box<dyn DriverHandle>>;
}

/// Handle to a task started by a [`Driver`].
#[async_trait]
pub trait DriverHandle: Send + Sync {
    fn id(&self) -> String;

    /// Resolves once the task exits: `Ok` on success, an error otherwise.
    ///
    /// Must be cancel safe and callable concurrently with `update` and `kill`.
    async fn wait(&self) -> Result<()>;

    async fn update(&self, task: &Task) -> Result<()>;

    /// Request termination. Exit is still observed through [`wait`](Self::wait).
    async fn kill(&self) -> Result<()>;
}

pub type DriverFactory = Arc<dyn Fn(&ClientConfig) -> Arc<dyn Driver> + Send + Sync>;

/// Maps driver names to constructors.
#[derive(Clone)]
pub struct DriverRegistry {
    config: Arc<ClientConfig>,
    factories: HashMap<String, DriverFactory>,
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl DriverRegistry {
    /// Registry with no drivers.
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self {
            config,
            factories: HashMap::new(),
        }
    }

    /// Registry with the `exec` and `docker` drivers.
    pub fn builtin(config: Arc<ClientConfig>) -> Self {
        Self::new(config)
            .with_driver("exec", |_| Arc::new(ExecDriver::new()))
            .with_driver("docker", |cfg| Arc::new(DockerDriver::new(cfg.sandbox.clone())))
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&ClientConfig) -> Arc<dyn Driver> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    pub fn with_driver<F>(mut self, kind: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ClientConfig) -> Arc<dyn Driver> + Send + Sync + 'static,
    {
        self.register(kind, factory);
        self
    }

    /// Instantiate the driver registered under `kind`.
    pub fn new_driver(&self, kind: &str) -> Result<Arc<dyn Driver>> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| NomadError::UnsupportedDriver(kind.to_string()))?;
        Ok(factory(&self.config))
    }

    /// Registered driver names, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}
