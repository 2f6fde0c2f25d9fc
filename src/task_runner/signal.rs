use std::sync::Mutex;

use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Number of task updates that may be queued for a runner before new ones
/// are dropped.
pub const UPDATE_CHANNEL_CAPACITY: usize = 8;

/// One-shot destroy request.
///
/// The flag and the token are updated under one lock so the token is
/// cancelled exactly once however many callers race on [`request`](Self::request).
#[derive(Debug, Default)]
pub struct DestroySignal {
    requested: Mutex<bool>,
    token: CancellationToken,
}

impl DestroySignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal. Returns `true` only for the call that raised it.
    pub fn request(&self) -> bool {
        let mut requested = self.requested.lock().unwrap_or_else(|e| e.into_inner());
        if *requested {
            return false;
        }
        *requested = true;
        self.token.cancel();
        true
    }

    pub fn is_requested(&self) -> bool {
        *self.requested.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Completes once the signal has been raised.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}

/// Marks a task runner finished when dropped, whichever way `run` returns.
#[derive(Debug)]
pub(crate) struct CompletionGuard(watch::Sender<bool>);

impl CompletionGuard {
    pub(crate) fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self(tx), rx)
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}
