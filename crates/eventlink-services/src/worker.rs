//! Cancellable workers, the building block of every connection I/O loop.
//!
//! A worker is cooperatively cancelled: [`Worker::kill`] flips the token and
//! wakes whatever the loop is waiting on, and the loop notices on its next
//! step. The owning task marks the worker finished only after its teardown
//! has run, so [`Worker::is_alive`] stays true through teardown.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;

pub struct Worker {
    name: String,
    token: CancellationToken,
    finished: AtomicBool,
}

impl Worker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            token: CancellationToken::new(),
            finished: AtomicBool::new(false),
        }
    }

    /// A worker that never ran. Reports cancelled and not alive.
    pub fn inert(name: impl Into<String>) -> Self {
        let worker = Self::new(name);
        worker.token.cancel();
        worker.finished.store(true, Ordering::SeqCst);
        worker
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request cancellation. Idempotent.
    pub fn kill(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// True until the owning loop has exited and finished its teardown.
    pub fn is_alive(&self) -> bool {
        !self.finished.load(Ordering::SeqCst)
    }

    /// Resolves once [`Worker::kill`] has been called.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub(crate) fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("cancelled", &self.is_cancelled())
            .field("alive", &self.is_alive())
            .finish()
    }
}
