//! Core configuration monitor: load, watch, fan out.
//!
//! Dependents subscribe before `start` and only observe loads issued after
//! their subscription, so the initial load reaches fully-wired consumers.
//! The parent directory is watched rather than the file itself, so atomic
//! replace-by-rename (the usual way the settings UI saves) is seen.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{recommended_watcher, Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};

use keywarp_core::config::{load_core_configuration, CoreConfiguration};

use crate::tasks::ScopedTask;

pub struct ConfigurationMonitor {
    config_path: PathBuf,
    tx: Option<watch::Sender<Arc<CoreConfiguration>>>,
    seed: watch::Receiver<Arc<CoreConfiguration>>,
    task: Option<ScopedTask>,
}

impl ConfigurationMonitor {
    pub fn new(config_path: PathBuf) -> Self {
        let (tx, seed) = watch::channel(Arc::new(CoreConfiguration::default()));
        Self {
            config_path,
            tx: Some(tx),
            seed,
            task: None,
        }
    }

    /// Subscribe to configuration loads. Call before [`Self::start`].
    pub fn subscribe(&self) -> watch::Receiver<Arc<CoreConfiguration>> {
        self.seed.clone()
    }

    /// Perform the initial load + fan-out, then reload on file changes.
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }
        let Some(tx) = self.tx.take() else { return };
        let config_path = self.config_path.clone();
        self.task = Some(ScopedTask::spawn(run(config_path, tx)));
    }
}

async fn run(config_path: PathBuf, tx: watch::Sender<Arc<CoreConfiguration>>) {
    // Watch before the first load; a save landing between load and watch
    // registration must not be lost.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let watcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    });
    let mut watcher = match watcher {
        Ok(watcher) => watcher,
        Err(err) => {
            tracing::error!(error = %err, "failed to create configuration watcher");
            initial_load(&config_path, &tx);
            return;
        }
    };

    let watch_dir = config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    if let Err(err) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        tracing::error!(
            path = %watch_dir.display(),
            error = %err,
            "failed to watch configuration directory",
        );
        initial_load(&config_path, &tx);
        return;
    }

    let mut current = initial_load(&config_path, &tx);

    while let Some(event) = event_rx.recv().await {
        let event = match event {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error = %err, "configuration watcher event error");
                continue;
            }
        };
        if !is_relevant_event_kind(&event.kind) {
            continue;
        }
        if !event
            .paths
            .iter()
            .any(|path| path.file_name() == config_path.file_name())
        {
            continue;
        }

        match load_core_configuration(&config_path) {
            Ok(next) => {
                if next != current {
                    tracing::info!(path = %config_path.display(), "configuration reloaded");
                    current = next;
                    tx.send_replace(Arc::new(current.clone()));
                }
            }
            Err(err) => {
                tracing::warn!(
                    path = %config_path.display(),
                    error = %err,
                    "broken configuration file; keeping previous configuration",
                );
            }
        }
    }
}

fn initial_load(
    config_path: &Path,
    tx: &watch::Sender<Arc<CoreConfiguration>>,
) -> CoreConfiguration {
    let config = match load_core_configuration(config_path) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                path = %config_path.display(),
                error = %err,
                "broken configuration file; starting from defaults",
            );
            CoreConfiguration::default()
        }
    };
    tracing::info!(path = %config_path.display(), "configuration loaded");
    tx.send_replace(Arc::new(config.clone()));
    config
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}
