//! Test harness for task runner tests.
//!
//! Provides a scriptable mock driver and a parent that records every status
//! a task runner reports.

#![allow(dead_code)]

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use nomad_lite_agent::alloc::AllocParent;
use nomad_lite_agent::config::ClientConfig;
use nomad_lite_agent::driver::{Driver, DriverHandle, DriverRegistry, ExecContext};
use nomad_lite_agent::structs::{Task, TaskStatus};
use nomad_lite_agent::{NomadError, Result, TaskRunner};

pub const TEST_ALLOC_ID: &str = "abc123";

/// Shared, scriptable state behind every handle the mock driver hands out.
pub struct MockState {
    pub starts: AtomicUsize,
    pub kills: AtomicUsize,
    pub updates: Mutex<Vec<Task>>,
    pub start_error: Mutex<Option<String>>,
    pub fail_updates: AtomicBool,
    pub fail_kills: AtomicBool,
    /// When set, a kill makes the task exit with an error.
    pub exit_on_kill: AtomicBool,
    exit_tx: watch::Sender<Option<std::result::Result<(), String>>>,
}

impl MockState {
    pub fn new() -> Arc<Self> {
        let (exit_tx, _) = watch::channel(None);
        Arc::new(Self {
            starts: AtomicUsize::new(0),
            kills: AtomicUsize::new(0),
            updates: Mutex::new(Vec::new()),
            start_error: Mutex::new(None),
            fail_updates: AtomicBool::new(false),
            fail_kills: AtomicBool::new(false),
            exit_on_kill: AtomicBool::new(true),
            exit_tx,
        })
    }

    pub fn failing_start(reason: &str) -> Arc<Self> {
        let state = Self::new();
        *state.start_error.lock().unwrap() = Some(reason.to_string());
        state
    }

    /// Make the running task exit.
    pub fn exit(&self, result: std::result::Result<(), String>) {
        self.exit_tx.send_replace(Some(result));
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> Vec<Task> {
        self.updates.lock().unwrap().clone()
    }
}

pub struct MockDriver {
    state: Arc<MockState>,
}

#[async_trait]
impl Driver for MockDriver {
    fn name(&self) -> &str {
        "mock"
    }

    async fn start(&self, _ctx: &ExecContext, _task: &Task) -> Result<Box<dyn DriverHandle>> {
        if let Some(reason) = self.state.start_error.lock().unwrap().clone() {
            return Err(NomadError::Internal(reason));
        }
        self.state.starts.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockHandle {
            state: self.state.clone(),
        }))
    }
}

struct MockHandle {
    state: Arc<MockState>,
}

#[async_trait]
impl DriverHandle for MockHandle {
    fn id(&self) -> String {
        "mock:1".to_string()
    }

    async fn wait(&self) -> Result<()> {
        let mut rx = self.state.exit_tx.subscribe();
        let result = rx
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|r| (*r).clone());
        match result {
            Some(Ok(())) => Ok(()),
            Some(Err(reason)) => Err(NomadError::TaskExited(reason)),
            None => Err(NomadError::Internal("mock exit channel closed".to_string())),
        }
    }

    async fn update(&self, task: &Task) -> Result<()> {
        self.state.updates.lock().unwrap().push(task.clone());
        if self.state.fail_updates.load(Ordering::SeqCst) {
            return Err(NomadError::Internal("update rejected".to_string()));
        }
        Ok(())
    }

    async fn kill(&self) -> Result<()> {
        self.state.kills.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_kills.load(Ordering::SeqCst) {
            return Err(NomadError::KillFailed("mock refused".to_string()));
        }
        if self.state.exit_on_kill.load(Ordering::SeqCst) {
            self.state.exit(Err("terminated by signal 9".to_string()));
        }
        Ok(())
    }
}

/// Allocation parent that records every reported status in order.
#[derive(Default)]
pub struct RecordingParent {
    statuses: Mutex<Vec<(String, TaskStatus, String)>>,
}

impl RecordingParent {
    pub fn statuses(&self) -> Vec<(String, TaskStatus, String)> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn status_kinds(&self) -> Vec<TaskStatus> {
        self.statuses().into_iter().map(|(_, s, _)| s).collect()
    }

    pub fn last_status(&self) -> Option<(TaskStatus, String)> {
        self.statuses().pop().map(|(_, s, d)| (s, d))
    }
}

impl AllocParent for RecordingParent {
    fn alloc_id(&self) -> &str {
        TEST_ALLOC_ID
    }

    fn set_task_status(&self, task_name: &str, status: TaskStatus, description: &str) {
        self.statuses
            .lock()
            .unwrap()
            .push((task_name.to_string(), status, description.to_string()));
    }
}

pub fn mock_task(name: &str) -> Task {
    Task::new(name, "mock").with_config("command", "serve")
}

/// Build a task runner wired to `mock` and a recording parent.
pub fn mock_runner(
    state_dir: &Path,
    task: Task,
    mock: Arc<MockState>,
) -> (TaskRunner, Arc<RecordingParent>) {
    let config = Arc::new(ClientConfig::new(state_dir).with_alloc_dir(state_dir.join("allocs")));
    let drivers = DriverRegistry::new(config.clone()).with_driver("mock", move |_| {
        Arc::new(MockDriver {
            state: mock.clone(),
        })
    });
    let parent = Arc::new(RecordingParent::default());
    let ctx = ExecContext::new(TEST_ALLOC_ID, config.alloc_dir.join(TEST_ALLOC_ID));
    let runner = TaskRunner::new(config, parent.clone(), ctx, task).with_drivers(drivers);
    (runner, parent)
}

/// Wait for a condition to become true with timeout
pub async fn wait_for<F, Fut>(condition: F, timeout_duration: Duration, poll_interval: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout_duration {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Assert a synchronous condition eventually becomes true
pub async fn assert_eventually<F>(condition: F, message: &str)
where
    F: Fn() -> bool,
{
    let ok = wait_for(
        || {
            let result = condition();
            async move { result }
        },
        Duration::from_secs(5),
        Duration::from_millis(10),
    )
    .await;
    assert!(ok, "Condition not met within timeout: {}", message);
}
