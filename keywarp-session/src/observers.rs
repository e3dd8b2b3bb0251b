//! Session-scoped observers: system preferences, frontmost application,
//! input source.
//!
//! Each observer polls an injected probe and emits deduplicated changes.
//! The OS mechanics live entirely inside the default probes; everything the
//! orchestrator consumes is a typed event channel. The frontmost-application
//! detection runs here, in the user-session process, because the grabber's
//! own detection is unreliable across fast user switches.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use keywarp_core::types::{FrontmostApplication, InputSourceIdentifiers, SystemPreferences};
use keywarp_core::CoreConfiguration;

use crate::config_monitor::ConfigurationMonitor;
use crate::tasks::ScopedTask;

pub trait SystemPreferencesProbe: Send + Sync {
    fn read(&self) -> Option<SystemPreferences>;
}

pub trait FrontmostApplicationProbe: Send + Sync {
    fn read(&self) -> Option<FrontmostApplication>;
}

pub trait InputSourceProbe: Send + Sync {
    fn read(&self) -> Option<InputSourceIdentifiers>;
}

/// Reads Apple global preferences via `defaults read -g`.
pub struct DefaultSystemPreferencesProbe;

impl SystemPreferencesProbe for DefaultSystemPreferencesProbe {
    fn read(&self) -> Option<SystemPreferences> {
        read_system_preferences()
    }
}

/// Asks System Events for the frontmost process.
pub struct DefaultFrontmostApplicationProbe;

impl FrontmostApplicationProbe for DefaultFrontmostApplicationProbe {
    fn read(&self) -> Option<FrontmostApplication> {
        read_frontmost_application()
    }
}

/// Reads the selected keyboard layout from the HIToolbox domain.
pub struct DefaultInputSourceProbe;

impl InputSourceProbe for DefaultInputSourceProbe {
    fn read(&self) -> Option<InputSourceIdentifiers> {
        read_input_source()
    }
}

/// Polls system preferences; re-polls immediately when the configuration
/// changes, since a configuration switch usually accompanies a preference
/// change the user just made.
pub struct SystemPreferencesMonitor {
    config_rx: Option<watch::Receiver<Arc<CoreConfiguration>>>,
    probe: Arc<dyn SystemPreferencesProbe>,
    poll_interval: Duration,
    events: mpsc::UnboundedSender<SystemPreferences>,
    task: Option<ScopedTask>,
}

impl SystemPreferencesMonitor {
    pub fn new(
        configuration: &ConfigurationMonitor,
        probe: Arc<dyn SystemPreferencesProbe>,
        poll_interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<SystemPreferences>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                config_rx: Some(configuration.subscribe()),
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
        let Some(config_rx) = self.config_rx.take() else {
            return;
        };
        let probe = self.probe.clone();
        let events = self.events.clone();
        let poll_interval = self.poll_interval;
        self.task = Some(ScopedTask::spawn(run_system_preferences(
            config_rx,
            probe,
            poll_interval,
            events,
        )));
    }
}

async fn run_system_preferences(
    mut config_rx: watch::Receiver<Arc<CoreConfiguration>>,
    probe: Arc<dyn SystemPreferencesProbe>,
    poll_interval: Duration,
    events: mpsc::UnboundedSender<SystemPreferences>,
) {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut config_alive = true;
    let mut last: Option<SystemPreferences> = None;

    loop {
        if config_alive {
            tokio::select! {
                _ = interval.tick() => {}
                changed = config_rx.changed() => {
                    if changed.is_err() {
                        config_alive = false;
                        continue;
                    }
                    config_rx.borrow_and_update();
                }
            }
        } else {
            interval.tick().await;
        }

        let probe = probe.clone();
        let value = tokio::task::spawn_blocking(move || probe.read())
            .await
            .ok()
            .flatten();
        let Some(value) = value else { continue };
        if last.as_ref() != Some(&value) {
            tracing::info!(?value, "system preferences changed");
            last = Some(value.clone());
            let _ = events.send(value);
        }
    }
}

/// Polls the frontmost application of the user session.
pub struct FrontmostApplicationObserver {
    probe: Arc<dyn FrontmostApplicationProbe>,
    poll_interval: Duration,
    events: mpsc::UnboundedSender<FrontmostApplication>,
    task: Option<ScopedTask>,
}

impl FrontmostApplicationObserver {
    pub fn new(
        probe: Arc<dyn FrontmostApplicationProbe>,
        poll_interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<FrontmostApplication>) {
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
            let mut last: Option<FrontmostApplication> = None;

            loop {
                interval.tick().await;
                let probe = probe.clone();
                let value = tokio::task::spawn_blocking(move || probe.read())
                    .await
                    .ok()
                    .flatten();
                let Some(value) = value else { continue };
                if last.as_ref() != Some(&value) {
                    tracing::debug!(
                        bundle_identifier = value.bundle_identifier.as_deref().unwrap_or("-"),
                        "frontmost application changed",
                    );
                    last = Some(value.clone());
                    let _ = events.send(value);
                }
            }
        }));
    }
}

/// Polls the selected keyboard input source.
pub struct InputSourceObserver {
    probe: Arc<dyn InputSourceProbe>,
    poll_interval: Duration,
    events: mpsc::UnboundedSender<InputSourceIdentifiers>,
    task: Option<ScopedTask>,
}

impl InputSourceObserver {
    pub fn new(
        probe: Arc<dyn InputSourceProbe>,
        poll_interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<InputSourceIdentifiers>) {
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
            let mut last: Option<InputSourceIdentifiers> = None;

            loop {
                interval.tick().await;
                let probe = probe.clone();
                let value = tokio::task::spawn_blocking(move || probe.read())
                    .await
                    .ok()
                    .flatten();
                let Some(value) = value else { continue };
                if last.as_ref() != Some(&value) {
                    tracing::info!(input_source = %value, "input source changed");
                    last = Some(value.clone());
                    let _ = events.send(value);
                }
            }
        }));
    }
}

#[cfg(target_os = "macos")]
fn read_system_preferences() -> Option<SystemPreferences> {
    Some(SystemPreferences {
        use_fkeys_as_standard_function_keys: defaults_read_bool("com.apple.keyboard.fnState")
            .unwrap_or(false),
        scroll_direction_is_natural: defaults_read_bool("com.apple.swipescrolldirection")
            .unwrap_or(true),
    })
}

#[cfg(not(target_os = "macos"))]
fn read_system_preferences() -> Option<SystemPreferences> {
    None
}

#[cfg(target_os = "macos")]
fn defaults_read_bool(key: &str) -> Option<bool> {
    let output = std::process::Command::new("defaults")
        .args(["read", "-g", key])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    match String::from_utf8_lossy(&output.stdout).trim() {
        "1" => Some(true),
        "0" => Some(false),
        _ => None,
    }
}

#[cfg(target_os = "macos")]
fn read_frontmost_application() -> Option<FrontmostApplication> {
    let script = concat!(
        r#"tell application "System Events" to tell (first process whose frontmost is true)"#,
        "\n",
        r#"return (get bundle identifier) & linefeed & (POSIX path of application file)"#,
        "\n",
        "end tell",
    );
    let output = std::process::Command::new("osascript")
        .args(["-e", script])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let mut lines = text.lines();
    let bundle_identifier = lines
        .next()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty());
    let file_path = lines
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(std::path::PathBuf::from);
    Some(FrontmostApplication {
        bundle_identifier,
        file_path,
    })
}

#[cfg(not(target_os = "macos"))]
fn read_frontmost_application() -> Option<FrontmostApplication> {
    None
}

#[cfg(target_os = "macos")]
fn read_input_source() -> Option<InputSourceIdentifiers> {
    let output = std::process::Command::new("defaults")
        .args([
            "read",
            "com.apple.HIToolbox",
            "AppleCurrentKeyboardLayoutInputSourceID",
        ])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let input_source_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if input_source_id.is_empty() {
        return None;
    }
    Some(InputSourceIdentifiers {
        language: None,
        input_source_id: Some(input_source_id),
        input_mode_id: None,
    })
}

#[cfg(not(target_os = "macos"))]
fn read_input_source() -> Option<InputSourceIdentifiers> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::time::timeout;

    struct ScriptedPreferences {
        readings: Mutex<VecDeque<SystemPreferences>>,
        fallback: SystemPreferences,
    }

    impl SystemPreferencesProbe for ScriptedPreferences {
        fn read(&self) -> Option<SystemPreferences> {
            Some(
                self.readings
                    .lock()
                    .expect("probe lock")
                    .pop_front()
                    .unwrap_or_else(|| self.fallback.clone()),
            )
        }
    }

    struct ScriptedFrontmost {
        readings: Mutex<VecDeque<FrontmostApplication>>,
    }

    impl FrontmostApplicationProbe for ScriptedFrontmost {
        fn read(&self) -> Option<FrontmostApplication> {
            let mut readings = self.readings.lock().expect("probe lock");
            let front = readings.front().cloned();
            if readings.len() > 1 {
                readings.pop_front();
            }
            front
        }
    }

    #[tokio::test]
    async fn system_preferences_monitor_emits_changes_once() {
        let dir = TempDir::new().expect("tempdir");
        let mut configuration = ConfigurationMonitor::new(dir.path().join("keywarp.json"));

        let changed = SystemPreferences {
            use_fkeys_as_standard_function_keys: true,
            scroll_direction_is_natural: true,
        };
        let probe = Arc::new(ScriptedPreferences {
            readings: Mutex::new(
                vec![
                    SystemPreferences::default(),
                    SystemPreferences::default(),
                    changed.clone(),
                ]
                .into(),
            ),
            fallback: changed.clone(),
        });

        let (mut monitor, mut events) =
            SystemPreferencesMonitor::new(&configuration, probe, Duration::from_millis(10));
        monitor.start();
        configuration.start();

        let first = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("first value")
            .expect("monitor alive");
        assert_eq!(first, SystemPreferences::default());

        let second = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("second value")
            .expect("monitor alive");
        assert_eq!(second, changed, "repeated readings must be suppressed");
    }

    #[tokio::test]
    async fn frontmost_observer_reports_application_switches() {
        let editor = FrontmostApplication {
            bundle_identifier: Some("com.example.Editor".to_string()),
            file_path: Some(PathBuf::from("/Applications/Editor.app")),
        };
        let terminal = FrontmostApplication {
            bundle_identifier: Some("com.example.Terminal".to_string()),
            file_path: Some(PathBuf::from("/Applications/Terminal.app")),
        };
        let probe = Arc::new(ScriptedFrontmost {
            readings: Mutex::new(vec![editor.clone(), terminal.clone()].into()),
        });

        let (mut observer, mut events) =
            FrontmostApplicationObserver::new(probe, Duration::from_millis(10));
        observer.start();

        let first = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("first app")
            .expect("observer alive");
        assert_eq!(first, editor);

        let second = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("second app")
            .expect("observer alive");
        assert_eq!(second, terminal);

        // The terminal stays frontmost; nothing further may be emitted.
        let outcome = timeout(Duration::from_millis(150), events.recv()).await;
        assert!(outcome.is_err(), "steady state must stay silent");
    }

    #[tokio::test]
    async fn input_source_observer_dedups_identical_readings() {
        struct FixedInputSource;
        impl InputSourceProbe for FixedInputSource {
            fn read(&self) -> Option<InputSourceIdentifiers> {
                Some(InputSourceIdentifiers {
                    language: Some("en".to_string()),
                    input_source_id: Some("com.apple.keylayout.US".to_string()),
                    input_mode_id: None,
                })
            }
        }

        let (mut observer, mut events) =
            InputSourceObserver::new(Arc::new(FixedInputSource), Duration::from_millis(10));
        observer.start();

        let first = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("first reading")
            .expect("observer alive");
        assert_eq!(first.input_source_id.as_deref(), Some("com.apple.keylayout.US"));

        let outcome = timeout(Duration::from_millis(150), events.recv()).await;
        assert!(outcome.is_err(), "identical readings must be suppressed");
    }
}
