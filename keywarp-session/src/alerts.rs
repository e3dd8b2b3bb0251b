//! Grabber alerts watcher.
//!
//! The grabber rewrites its alerts status file whenever its alert set
//! changes. This watcher runs for the whole process lifetime, independent of
//! session and connection state, and emits the parsed alert list on every
//! content change (identical rewrites are suppressed).

use std::path::{Path, PathBuf};

use notify::{recommended_watcher, Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use keywarp_core::types::GrabberAlerts;

use crate::tasks::ScopedTask;

pub struct AlertsWatcher {
    alerts_path: PathBuf,
    events: mpsc::UnboundedSender<GrabberAlerts>,
    task: Option<ScopedTask>,
}

impl AlertsWatcher {
    pub fn new(alerts_path: PathBuf) -> (Self, mpsc::UnboundedReceiver<GrabberAlerts>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                alerts_path,
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
        let alerts_path = self.alerts_path.clone();
        let events = self.events.clone();
        self.task = Some(ScopedTask::spawn(run(alerts_path, events)));
    }
}

async fn run(alerts_path: PathBuf, events: mpsc::UnboundedSender<GrabberAlerts>) {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let watcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    });
    let mut watcher = match watcher {
        Ok(watcher) => watcher,
        Err(err) => {
            tracing::error!(error = %err, "failed to create alerts watcher");
            return;
        }
    };

    let watch_dir = alerts_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    if let Err(err) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        tracing::error!(
            path = %watch_dir.display(),
            error = %err,
            "failed to watch alerts directory",
        );
        return;
    }

    let mut last_contents: Option<String> = None;
    read_and_emit(&alerts_path, &events, &mut last_contents);

    while let Some(event) = event_rx.recv().await {
        let event = match event {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error = %err, "alerts watcher event error");
                continue;
            }
        };
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            continue;
        }
        if !event
            .paths
            .iter()
            .any(|path| path.file_name() == alerts_path.file_name())
        {
            continue;
        }
        read_and_emit(&alerts_path, &events, &mut last_contents);
    }
}

fn read_and_emit(
    alerts_path: &Path,
    events: &mpsc::UnboundedSender<GrabberAlerts>,
    last_contents: &mut Option<String>,
) {
    let contents = match std::fs::read_to_string(alerts_path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return,
        Err(err) => {
            tracing::warn!(
                path = %alerts_path.display(),
                error = %err,
                "failed to read alerts file",
            );
            return;
        }
    };

    if last_contents.as_deref() == Some(contents.as_str()) {
        return;
    }
    *last_contents = Some(contents.clone());

    match serde_json::from_str::<GrabberAlerts>(&contents) {
        Ok(alerts) => {
            let _ = events.send(alerts);
        }
        Err(err) => {
            tracing::warn!(
                path = %alerts_path.display(),
                error = %err,
                "malformed alerts file",
            );
        }
    }
}
