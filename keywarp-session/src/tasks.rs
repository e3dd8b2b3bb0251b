//! Abort-on-drop guard for collaborator-internal tasks.

use std::future::Future;

use tokio::task::JoinHandle;

/// A background task whose lifetime is tied to its owner: dropping the guard
/// aborts the task, so a collaborator's internal loops stop as soon as the
/// orchestrator releases the collaborator.
pub(crate) struct ScopedTask(JoinHandle<()>);

impl ScopedTask {
    pub(crate) fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self(tokio::spawn(future))
    }
}

impl Drop for ScopedTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}
