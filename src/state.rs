//! Durable task runner snapshots.
//!
//! Each task runner persists the minimum it needs to resume bookkeeping after
//! an agent restart: the task specification. Snapshots live at a path derived
//! from the state directory, the allocation ID and a hash of the task name:
//!
//! ```text
//! <state_dir>/alloc/<alloc_id>/task-<hash>/state.json
//! ```
//!
//! The path is recomputable from task identity alone, so no index is kept.

use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{NomadError, Result};
use crate::structs::Task;

const STATE_FILE_NAME: &str = "state.json";

/// Bytes of the task name digest kept in the directory name.
const TASK_HASH_BYTES: usize = 16;

/// Snapshot of a task runner. Driver handles are never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRunnerState {
    pub task: Task,
}

/// Path of the snapshot file for `task_name` in allocation `alloc_id`.
pub fn state_file_path(state_dir: &Path, alloc_id: &str, task_name: &str) -> PathBuf {
    let digest = Sha256::digest(task_name.as_bytes());
    let mut hash = String::with_capacity(TASK_HASH_BYTES * 2);
    for byte in digest.iter().take(TASK_HASH_BYTES) {
        let _ = write!(hash, "{:02x}", byte);
    }

    state_dir
        .join("alloc")
        .join(alloc_id)
        .join(format!("task-{}", hash))
        .join(STATE_FILE_NAME)
}

/// Serialize `value` to `path`, replacing any previous snapshot.
///
/// The snapshot is written to a sibling temp file and renamed into place so a
/// crash mid-write never leaves a truncated file behind.
pub async fn persist_state<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let data = serde_json::to_vec_pretty(value)?;
    let tmp = tmp_path(path);
    let written = match tokio::fs::write(&tmp, &data).await {
        Ok(()) => tokio::fs::rename(&tmp, path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }

    tracing::trace!(path = %path.display(), bytes = data.len(), "State persisted");
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    path.with_extension("json.tmp")
}

/// Load a snapshot previously written by [`persist_state`].
pub async fn restore_state<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(NomadError::StateNotFound(path.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };

    serde_json::from_slice(&data).map_err(|source| NomadError::CorruptState {
        path: path.to_path_buf(),
        source,
    })
}

/// Remove the snapshot at `path` and its task directory. Missing files are
/// not an error.
pub async fn erase_state(path: &Path) -> Result<()> {
    for file in [path.to_path_buf(), tmp_path(path)] {
        match tokio::fs::remove_file(&file).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }

    // The task directory only ever holds the snapshot; leave it alone if
    // something else was put there.
    if let Some(dir) = path.parent() {
        if let Err(e) = tokio::fs::remove_dir(dir).await {
            if e.kind() != ErrorKind::NotFound && e.kind() != ErrorKind::DirectoryNotEmpty {
                return Err(e.into());
            }
        }
    }
    Ok(())
}
