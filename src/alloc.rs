//! Boundary between a task runner and the allocation that owns it.

use chrono::Utc;
use tokio::sync::mpsc;

use crate::structs::{TaskStatus, TaskStatusUpdate};

/// The allocation runner that owns a set of task runners.
pub trait AllocParent: Send + Sync {
    fn alloc_id(&self) -> &str;

    /// Record a status transition of one of the allocation's tasks.
    fn set_task_status(&self, task_name: &str, status: TaskStatus, description: &str);
}

/// Forwards task status transitions to a receiver owned by the allocation.
#[derive(Debug, Clone)]
pub struct ChannelAllocParent {
    alloc_id: String,
    tx: mpsc::UnboundedSender<TaskStatusUpdate>,
}

impl ChannelAllocParent {
    pub fn new(
        alloc_id: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<TaskStatusUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                alloc_id: alloc_id.into(),
                tx,
            },
            rx,
        )
    }
}

impl AllocParent for ChannelAllocParent {
    fn alloc_id(&self) -> &str {
        &self.alloc_id
    }

    fn set_task_status(&self, task_name: &str, status: TaskStatus, description: &str) {
        let update = TaskStatusUpdate {
            task_name: task_name.to_string(),
            status,
            description: description.to_string(),
            at: Utc::now(),
        };
        if self.tx.send(update).is_err() {
            tracing::debug!(
                alloc_id = %self.alloc_id,
                task = task_name,
                status = %status,
                "Status receiver dropped, discarding task status"
            );
        }
    }
}
