//! The session agent orchestrator.
//!
//! One serialized state machine owns every collaborator. The console user
//! monitor drives the receiver lifecycle, a successful bind drives the
//! grabber client lifecycle, and a connected client drives the child
//! component set. Every event from every collaborator is funneled through
//! the serial queue before it touches shared state, so the state itself
//! needs no locks.
//!
//! Collaborator instances are replaced, never mutated: each receiver and
//! client creation bumps a generation counter, and events carry the
//! generation they were wired with, so a stale event from a replaced
//! instance becomes a no-op instead of acting on its successor.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use keywarp_core::types::{FrontmostApplication, GrabberAlerts, InputSourceIdentifiers, SystemPreferences};
use keywarp_core::{config, paths};

use crate::alerts::AlertsWatcher;
use crate::config_monitor::ConfigurationMonitor;
use crate::error::SessionError;
use crate::grabber_client::{GrabberClient, GrabberClientEvent};
use crate::launcher;
use crate::observers::{
    DefaultFrontmostApplicationProbe, DefaultInputSourceProbe, DefaultSystemPreferencesProbe,
    FrontmostApplicationObserver, FrontmostApplicationProbe, InputSourceObserver,
    InputSourceProbe, SystemPreferencesMonitor, SystemPreferencesProbe,
};
use crate::process_managers::{MenuProcessManager, UpdaterProcessManager};
use crate::queue::{QueueHandle, SerialQueue};
use crate::receiver::{Receiver, ReceiverEvent};
use crate::session_monitor::{ConsoleUserProbe, DevConsoleProbe, SessionMonitor};
use crate::version::VersionWatch;

/// The uid this process runs as.
pub fn current_uid() -> u32 {
    // getuid cannot fail.
    unsafe { libc::getuid() }
}

/// Detection probes for the session-scoped observers. Injectable so tests
/// (and other platforms) can supply their own sources.
pub struct Probes {
    pub console_user: Arc<dyn ConsoleUserProbe>,
    pub system_preferences: Arc<dyn SystemPreferencesProbe>,
    pub frontmost_application: Arc<dyn FrontmostApplicationProbe>,
    pub input_source: Arc<dyn InputSourceProbe>,
}

impl Default for Probes {
    fn default() -> Self {
        Self {
            console_user: Arc::new(DevConsoleProbe::new()),
            system_preferences: Arc::new(DefaultSystemPreferencesProbe),
            frontmost_application: Arc::new(DefaultFrontmostApplicationProbe),
            input_source: Arc::new(DefaultInputSourceProbe),
        }
    }
}

/// Poll cadences of the observers.
#[derive(Debug, Clone)]
pub struct Intervals {
    pub console_user_poll: Duration,
    pub system_preferences_poll: Duration,
    pub frontmost_application_poll: Duration,
    pub input_source_poll: Duration,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            console_user_poll: Duration::from_secs(1),
            system_preferences_poll: Duration::from_secs(3),
            frontmost_application_poll: Duration::from_secs(1),
            input_source_poll: Duration::from_secs(1),
        }
    }
}

/// Construction parameters for [`SessionAgent`].
pub struct AgentOptions {
    /// Root of the grabber's shared state (run dir, alerts file, version file).
    pub system_root: PathBuf,
    /// Home directory owning the user configuration.
    pub home: PathBuf,
    pub own_uid: u32,
    pub probes: Probes,
    pub intervals: Intervals,
    /// Invoked at most once when the installed version no longer matches the
    /// running one. Defaults to a no-op; the binary wires it to stop the run
    /// loop.
    pub on_version_mismatch: Box<dyn Fn() + Send + Sync>,
}

impl AgentOptions {
    pub fn new(system_root: PathBuf, home: PathBuf) -> Self {
        Self {
            system_root,
            home,
            own_uid: current_uid(),
            probes: Probes::default(),
            intervals: Intervals::default(),
            on_version_mismatch: Box::new(|| {}),
        }
    }
}

/// Queue-serialized snapshot of the orchestrator, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentStatus {
    pub console_user: Option<u32>,
    pub receiver_active: bool,
    pub grabber_client_active: bool,
    pub child_components_active: bool,
}

/// The session agent root value. Owns the serial queue; dropping it after
/// [`Self::shutdown`] releases everything.
pub struct SessionAgent {
    queue: SerialQueue<AgentState>,
}

impl SessionAgent {
    /// Create the agent and start its root collaborators (version watch,
    /// alerts watcher, console user monitor).
    pub fn start(options: AgentOptions) -> Self {
        let queue = SerialQueue::new(|handle| AgentState::new(handle, options));
        let agent = Self { queue };
        agent.queue.handle().submit(AgentState::bootstrap);
        agent
    }

    pub async fn status(&self) -> Result<AgentStatus, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.queue.handle().submit(move |state| {
            let _ = tx.send(state.status());
        });
        rx.await
            .map_err(|_| SessionError::ChannelClosed("agent queue"))
    }

    /// Tear everything down in order and drain the queue. No task observes a
    /// partially-destroyed agent; the final teardown runs alone, to
    /// completion, before this returns.
    pub async fn shutdown(self) -> Result<(), SessionError> {
        self.queue.handle().submit(AgentState::teardown);
        self.queue
            .terminate()
            .await
            .map(|_| ())
            .map_err(|err| SessionError::Queue(err.to_string()))
    }
}

/// Session-scoped child components. Created and destroyed as one unit;
/// non-empty exactly while the grabber channel is connected.
struct ChildComponents {
    _configuration_monitor: ConfigurationMonitor,
    _menu_process_manager: MenuProcessManager,
    _updater_process_manager: UpdaterProcessManager,
    _system_preferences_monitor: SystemPreferencesMonitor,
    _frontmost_application_observer: FrontmostApplicationObserver,
    _input_source_observer: InputSourceObserver,
}

struct AgentState {
    queue: QueueHandle<AgentState>,
    system_root: PathBuf,
    home: PathBuf,
    own_uid: u32,
    probes: Probes,
    intervals: Intervals,
    on_version_mismatch: Option<Box<dyn Fn() + Send + Sync>>,

    console_user: Option<u32>,
    version_watch: Option<VersionWatch>,
    alerts_watcher: Option<AlertsWatcher>,
    session_monitor: Option<SessionMonitor>,
    receiver: Option<Receiver>,
    receiver_generation: u64,
    grabber_client: Option<Arc<GrabberClient>>,
    grabber_client_generation: u64,
    child_components: Option<ChildComponents>,
}

impl AgentState {
    fn new(queue: QueueHandle<AgentState>, options: AgentOptions) -> Self {
        Self {
            queue,
            system_root: options.system_root,
            home: options.home,
            own_uid: options.own_uid,
            probes: options.probes,
            intervals: options.intervals,
            on_version_mismatch: Some(options.on_version_mismatch),
            console_user: None,
            version_watch: None,
            alerts_watcher: None,
            session_monitor: None,
            receiver: None,
            receiver_generation: 0,
            grabber_client: None,
            grabber_client_generation: 0,
            child_components: None,
        }
    }

    fn bootstrap(&mut self) {
        let on_mismatch = self
            .on_version_mismatch
            .take()
            .unwrap_or_else(|| Box::new(|| {}));
        let version_watch =
            VersionWatch::new(paths::version_path(&self.system_root), on_mismatch);
        version_watch.manual_check();
        self.version_watch = Some(version_watch);

        self.start_alerts_watcher();
        self.start_session_monitor();
    }

    /// Forward a collaborator's typed events into the serial queue. The pump
    /// ends when the collaborator (the sender side) is dropped; submissions
    /// still in flight afterwards hit handlers that check the current state.
    fn pump<E, F>(&self, mut events: mpsc::UnboundedReceiver<E>, apply: F)
    where
        E: Send + 'static,
        F: Fn(&mut AgentState, E) + Send + Copy + 'static,
    {
        let queue = self.queue.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                queue.submit(move |state| apply(state, event));
            }
        });
    }

    fn start_alerts_watcher(&mut self) {
        if self.alerts_watcher.is_some() {
            return;
        }
        let (mut watcher, events) =
            AlertsWatcher::new(paths::grabber_alerts_json_path(&self.system_root));
        self.pump(events, AgentState::on_alerts_changed);
        watcher.start();
        self.alerts_watcher = Some(watcher);
    }

    fn start_session_monitor(&mut self) {
        if self.session_monitor.is_some() {
            return;
        }
        let (mut monitor, events) = SessionMonitor::new(
            self.probes.console_user.clone(),
            self.intervals.console_user_poll,
        );
        self.pump(events, AgentState::on_console_user_changed);
        monitor.start();
        self.session_monitor = Some(monitor);
    }

    fn on_console_user_changed(&mut self, uid: u32) {
        self.console_user = Some(uid);
        self.manual_version_check();

        if let Err(err) = config::ensure_user_configuration_directory(&self.home) {
            tracing::warn!(error = %err, "failed to create user configuration directory");
        }

        if uid != self.own_uid {
            // Not our session: no receiver, no client, no children.
            self.receiver = None;
            self.stop_grabber_client();
            return;
        }

        // A new session owns a new channel; replace any previous receiver
        // outright.
        self.receiver = None;
        self.receiver_generation += 1;
        let generation = self.receiver_generation;

        let socket = paths::session_agent_socket_path(&self.system_root, uid);
        let (mut receiver, events) = Receiver::new(socket);
        self.pump(events, move |state, event| {
            state.on_receiver_event(generation, event)
        });
        receiver.start();
        self.receiver = Some(receiver);
    }

    fn on_receiver_event(&mut self, generation: u64, event: ReceiverEvent) {
        if self.receiver.is_none() || generation != self.receiver_generation {
            tracing::debug!(?event, "ignoring event from a replaced receiver");
            return;
        }

        match event {
            ReceiverEvent::Bound => {
                self.manual_version_check();
                self.stop_grabber_client();
                self.start_grabber_client();
            }
            ReceiverEvent::BindFailed(code) => {
                tracing::error!(code, "session agent socket bind failed");
                self.stop_grabber_client();
            }
            ReceiverEvent::Closed => {
                self.stop_grabber_client();
            }
        }
    }

    fn start_grabber_client(&mut self) {
        if self.grabber_client.is_some() {
            return;
        }
        self.grabber_client_generation += 1;
        let generation = self.grabber_client_generation;

        let endpoint = paths::grabber_session_endpoint_path(&self.system_root, self.own_uid);
        let (mut client, events) = GrabberClient::new(endpoint);
        self.pump(events, move |state, event| {
            state.on_grabber_client_event(generation, event)
        });
        client.start();
        self.grabber_client = Some(Arc::new(client));
    }

    fn stop_grabber_client(&mut self) {
        self.grabber_client = None;
        self.stop_child_components();
    }

    fn on_grabber_client_event(&mut self, generation: u64, event: GrabberClientEvent) {
        if self.grabber_client.is_none() || generation != self.grabber_client_generation {
            tracing::debug!(?event, "ignoring event from a replaced grabber client");
            return;
        }

        match event {
            GrabberClientEvent::Connected => {
                self.manual_version_check();
                if let Some(client) = &self.grabber_client {
                    client.connect_session_endpoint(self.own_uid);
                }
                // Recreate the whole set: stale observer state from a prior
                // connection is not valid against the new channel.
                self.stop_child_components();
                self.start_child_components();
            }
            GrabberClientEvent::ConnectFailed(code) => {
                tracing::warn!(code, "grabber session endpoint connect failed");
                self.manual_version_check();
                self.stop_child_components();
            }
            GrabberClientEvent::Closed => {
                self.manual_version_check();
                self.stop_child_components();
            }
        }
    }

    fn start_child_components(&mut self) {
        let mut configuration_monitor =
            ConfigurationMonitor::new(paths::core_configuration_path(&self.home));

        let menu_process_manager = MenuProcessManager::new(&configuration_monitor);
        let updater_process_manager = UpdaterProcessManager::new(&configuration_monitor);

        let (mut system_preferences_monitor, events) = SystemPreferencesMonitor::new(
            &configuration_monitor,
            self.probes.system_preferences.clone(),
            self.intervals.system_preferences_poll,
        );
        self.pump(events, AgentState::on_system_preferences_changed);
        system_preferences_monitor.start();

        let (mut frontmost_application_observer, events) = FrontmostApplicationObserver::new(
            self.probes.frontmost_application.clone(),
            self.intervals.frontmost_application_poll,
        );
        self.pump(events, AgentState::on_frontmost_application_changed);
        frontmost_application_observer.start();

        let (mut input_source_observer, events) = InputSourceObserver::new(
            self.probes.input_source.clone(),
            self.intervals.input_source_poll,
        );
        self.pump(events, AgentState::on_input_source_changed);
        input_source_observer.start();

        // Start the configuration monitor last so its initial load fan-out
        // reaches fully-wired consumers.
        configuration_monitor.start();

        self.child_components = Some(ChildComponents {
            _configuration_monitor: configuration_monitor,
            _menu_process_manager: menu_process_manager,
            _updater_process_manager: updater_process_manager,
            _system_preferences_monitor: system_preferences_monitor,
            _frontmost_application_observer: frontmost_application_observer,
            _input_source_observer: input_source_observer,
        });
    }

    fn stop_child_components(&mut self) {
        self.child_components = None;
    }

    fn on_system_preferences_changed(&mut self, system_preferences: SystemPreferences) {
        if let Some(client) = &self.grabber_client {
            client.system_preferences_updated(system_preferences);
        }
    }

    fn on_frontmost_application_changed(&mut self, application: FrontmostApplication) {
        if let Some(bundle_identifier) = &application.bundle_identifier {
            // Observing the diagnostic viewer must not perturb remapping
            // state.
            if paths::EVENT_VIEWER_BUNDLE_IDENTIFIERS.contains(&bundle_identifier.as_str()) {
                return;
            }
        }
        if let Some(client) = &self.grabber_client {
            client.frontmost_application_changed(
                application.bundle_identifier,
                application.file_path,
            );
        }
    }

    fn on_input_source_changed(&mut self, input_source: InputSourceIdentifiers) {
        if let Some(client) = &self.grabber_client {
            client.input_source_changed(input_source);
        }
    }

    fn on_alerts_changed(&mut self, alerts: GrabberAlerts) {
        tracing::info!(count = alerts.alerts.len(), "grabber alerts file updated");
        if !alerts.alerts.is_empty() {
            launcher::launch_settings();
        }
    }

    fn manual_version_check(&self) {
        if let Some(version_watch) = &self.version_watch {
            version_watch.manual_check();
        }
    }

    fn status(&self) -> AgentStatus {
        AgentStatus {
            console_user: self.console_user,
            receiver_active: self.receiver.is_some(),
            grabber_client_active: self.grabber_client.is_some(),
            child_components_active: self.child_components.is_some(),
        }
    }

    fn teardown(&mut self) {
        self.stop_grabber_client();
        self.session_monitor = None;
        self.receiver = None;
        self.alerts_watcher = None;
        self.version_watch = None;
    }
}
