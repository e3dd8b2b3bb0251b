//! Filesystem locations and well-known identifiers of the keywarp suite.
//!
//! Every helper takes its root directory explicitly so tests can point the
//! whole suite at a temporary directory.

use std::path::{Path, PathBuf};

/// LaunchAgent label of the session agent.
pub const SESSION_AGENT_LABEL: &str = "dev.keywarp.session-agent";

pub const SETTINGS_BUNDLE_IDENTIFIER: &str = "dev.keywarp.Settings";
pub const MENU_BUNDLE_IDENTIFIER: &str = "dev.keywarp.Menu";
pub const UPDATER_BUNDLE_IDENTIFIER: &str = "dev.keywarp.Updater";

/// Bundle identifiers of the diagnostic event viewer (current and legacy).
/// Frontmost-application reports for these are never forwarded to the
/// grabber; observing the diagnostic tool must not perturb remapping state.
pub const EVENT_VIEWER_BUNDLE_IDENTIFIERS: [&str; 2] =
    ["dev.keywarp.EventViewer", "dev.keywarp.Keywarp-EventViewer"];

pub const CORE_CONFIGURATION_FILE: &str = "keywarp.json";
pub const GRABBER_ALERTS_FILE: &str = "grabber_alerts.json";
pub const VERSION_FILE: &str = "version";

/// Root of the grabber's shared state on a production install.
pub fn default_system_root() -> PathBuf {
    PathBuf::from("/Library/Application Support/keywarp")
}

/// `<system_root>/run`, holding the unix sockets of the running suite.
pub fn run_dir(system_root: &Path) -> PathBuf {
    system_root.join("run")
}

/// Socket the session agent binds; the grabber connects here.
pub fn session_agent_socket_path(system_root: &Path, uid: u32) -> PathBuf {
    run_dir(system_root).join(format!("session_agent.{uid}.sock"))
}

/// The grabber's per-session endpoint; the session agent connects here.
pub fn grabber_session_endpoint_path(system_root: &Path, uid: u32) -> PathBuf {
    run_dir(system_root).join(format!("grabber_session.{uid}.sock"))
}

/// Status file the grabber rewrites whenever its alert set changes.
pub fn grabber_alerts_json_path(system_root: &Path) -> PathBuf {
    system_root.join(GRABBER_ALERTS_FILE)
}

/// Version file written by the installer; read by the version watch.
pub fn version_path(system_root: &Path) -> PathBuf {
    system_root.join(VERSION_FILE)
}

/// `<home>/.config/keywarp`
pub fn user_configuration_directory(home: &Path) -> PathBuf {
    home.join(".config").join("keywarp")
}

/// `<home>/.config/keywarp/keywarp.json`
pub fn core_configuration_path(home: &Path) -> PathBuf {
    user_configuration_directory(home).join(CORE_CONFIGURATION_FILE)
}

/// `<home>/Library/Logs/keywarp`
pub fn user_log_directory(home: &Path) -> PathBuf {
    home.join("Library").join("Logs").join("keywarp")
}

pub fn launch_agents_dir(home: &Path) -> PathBuf {
    home.join("Library").join("LaunchAgents")
}

pub fn launchd_plist_path(home: &Path) -> PathBuf {
    launch_agents_dir(home).join(format!("{SESSION_AGENT_LABEL}.plist"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_paths_are_per_uid() {
        let root = Path::new("/tmp/keywarp");
        assert_eq!(
            session_agent_socket_path(root, 501),
            PathBuf::from("/tmp/keywarp/run/session_agent.501.sock")
        );
        assert_eq!(
            grabber_session_endpoint_path(root, 502),
            PathBuf::from("/tmp/keywarp/run/grabber_session.502.sock")
        );
    }

    #[test]
    fn user_paths_hang_off_home() {
        let home = Path::new("/Users/tester");
        assert_eq!(
            core_configuration_path(home),
            PathBuf::from("/Users/tester/.config/keywarp/keywarp.json")
        );
        assert!(launchd_plist_path(home)
            .ends_with("Library/LaunchAgents/dev.keywarp.session-agent.plist"));
    }

    #[test]
    fn event_viewer_identifiers_include_legacy_name() {
        assert!(EVENT_VIEWER_BUNDLE_IDENTIFIERS
            .iter()
            .any(|id| id.contains("EventViewer")));
        assert_eq!(EVENT_VIEWER_BUNDLE_IDENTIFIERS.len(), 2);
    }
}
