//! Version consistency watch.
//!
//! Captures the installed version at construction. Checks are requested at
//! lifecycle transition points and run on the watch's own task; a detected
//! mismatch invokes the handler at most once. What the handler does (stop
//! the run loop so launchd restarts the agent against the new install) is
//! the caller's decision.

use std::path::{Path, PathBuf};

use tokio::sync::mpsc;

use crate::tasks::ScopedTask;

pub struct VersionWatch {
    trigger: mpsc::UnboundedSender<()>,
    _task: ScopedTask,
}

impl VersionWatch {
    pub fn new(version_path: PathBuf, on_mismatch: Box<dyn Fn() + Send + Sync>) -> Self {
        let (trigger, mut trigger_rx) = mpsc::unbounded_channel();
        let task = ScopedTask::spawn(async move {
            let expected = read_version(&version_path);
            tracing::debug!(
                path = %version_path.display(),
                version = expected.as_deref().unwrap_or("-"),
                "version captured",
            );
            let mut fired = false;

            while trigger_rx.recv().await.is_some() {
                if fired {
                    continue;
                }
                let current = read_version(&version_path);
                if current != expected {
                    tracing::warn!(
                        expected = expected.as_deref().unwrap_or("-"),
                        current = current.as_deref().unwrap_or("-"),
                        "installed version changed; requesting restart",
                    );
                    fired = true;
                    on_mismatch();
                }
            }
        });
        Self {
            trigger,
            _task: task,
        }
    }

    /// Request a check. Non-blocking; the comparison runs on the watch task.
    pub fn manual_check(&self) {
        let _ = self.trigger.send(());
    }
}

fn read_version(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|contents| contents.trim().to_string())
}
