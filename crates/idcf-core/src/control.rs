//! Cooperative cancellation for a download run.
//!
//! A `RunControl` is shared between the orchestrator and whatever requests
//! the stop (the CLI's Ctrl-C handler). Cancellation is graceful: the
//! orchestrator stops issuing new tasks, lets in-flight transfers reach a
//! terminal state, persists the checkpoint, and exits with the "aborted"
//! status so the operator can tell it apart from a completed-with-failures
//! run.

use std::sync::atomic::{AtomicBool, Ordering};

/// Shared cancel token. The orchestrator checks it before issuing each task.
#[derive(Debug, Default)]
pub struct RunControl {
    cancel: AtomicBool,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a graceful stop. In-flight transfers are allowed to finish.
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}
