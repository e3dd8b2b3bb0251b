//! Console user identity source.
//!
//! Emits the uid owning the console session whenever it changes, including
//! the first reading after start. The concrete detection mechanism sits
//! behind [`ConsoleUserProbe`]; the default probe reads the owner of
//! `/dev/console`, which tracks fast user switching on macOS.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::tasks::ScopedTask;

pub trait ConsoleUserProbe: Send + Sync {
    /// Current owner of the console session, if determinable.
    fn console_user(&self) -> Option<u32>;
}

/// Default probe: owner uid of `/dev/console`.
pub struct DevConsoleProbe {
    console_path: PathBuf,
}

impl DevConsoleProbe {
    pub fn new() -> Self {
        Self::at(PathBuf::from("/dev/console"))
    }

    /// Probe an arbitrary path (tests point this at a temporary file).
    pub fn at(console_path: PathBuf) -> Self {
        Self { console_path }
    }
}

impl Default for DevConsoleProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleUserProbe for DevConsoleProbe {
    #[cfg(unix)]
    fn console_user(&self) -> Option<u32> {
        use std::os::unix::fs::MetadataExt;
        std::fs::metadata(&self.console_path).ok().map(|meta| meta.uid())
    }

    #[cfg(not(unix))]
    fn console_user(&self) -> Option<u32> {
        None
    }
}

/// Polls a [`ConsoleUserProbe`] and emits deduplicated uid changes.
pub struct SessionMonitor {
    probe: Arc<dyn ConsoleUserProbe>,
    poll_interval: Duration,
    events: mpsc::UnboundedSender<u32>,
    task: Option<ScopedTask>,
}

impl SessionMonitor {
    pub fn new(
        probe: Arc<dyn ConsoleUserProbe>,
        poll_interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<u32>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                probe,
                poll_interval,
                events,
                task: None,
            },
            events_rx,
        )
    }

    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }
        let probe = self.probe.clone();
        let events = self.events.clone();
        let poll_interval = self.poll_interval;
        self.task = Some(ScopedTask::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut last: Option<u32> = None;

            loop {
                interval.tick().await;
                let probe = probe.clone();
                let uid = tokio::task::spawn_blocking(move || probe.console_user())
                    .await
                    .ok()
                    .flatten();
                let Some(uid) = uid else { continue };
                if last != Some(uid) {
                    tracing::info!(uid, "console user changed");
                    last = Some(uid);
                    let _ = events.send(uid);
                }
            }
        }));
    }
}
