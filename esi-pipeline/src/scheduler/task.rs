//! Handles to running source loops.

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A spawned per-source timer loop.
#[derive(Debug)]
pub struct SourceTask {
    pub source_id: String,
    pub created_at: Instant,
    cancellation_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl SourceTask {
    pub fn new(source_id: String, cancellation_token: CancellationToken, handle: JoinHandle<()>) -> Self {
        Self {
            source_id,
            created_at: Instant::now(),
            cancellation_token,
            handle,
        }
    }

    /// Stop the loop's timer. A cycle already running is left to finish.
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn into_handle(self) -> JoinHandle<()> {
        self.handle
    }
}
