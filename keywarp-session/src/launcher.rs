//! Launches and quits companion applications of the suite.
//!
//! Everything here is fire-and-forget: a launch that fails is logged and
//! forgotten, matching how the rest of the agent treats auxiliary UI.

use keywarp_core::paths::{
    MENU_BUNDLE_IDENTIFIER, SETTINGS_BUNDLE_IDENTIFIER, UPDATER_BUNDLE_IDENTIFIER,
};

/// Bring up the settings UI (used when the grabber reports alerts).
pub fn launch_settings() {
    launch_application(SETTINGS_BUNDLE_IDENTIFIER);
}

pub fn launch_menu() {
    launch_application(MENU_BUNDLE_IDENTIFIER);
}

pub fn quit_menu() {
    quit_application(MENU_BUNDLE_IDENTIFIER);
}

pub fn launch_updater() {
    launch_application(UPDATER_BUNDLE_IDENTIFIER);
}

#[cfg(target_os = "macos")]
fn launch_application(bundle_identifier: &str) {
    tracing::info!(bundle_identifier, "launching application");
    spawn_detached(
        std::process::Command::new("open").args(["-b", bundle_identifier]),
        bundle_identifier,
    );
}

#[cfg(not(target_os = "macos"))]
fn launch_application(bundle_identifier: &str) {
    tracing::warn!(
        bundle_identifier,
        "application launch is only supported on macOS"
    );
}

#[cfg(target_os = "macos")]
fn quit_application(bundle_identifier: &str) {
    tracing::info!(bundle_identifier, "quitting application");
    let script = format!(r#"tell application id "{bundle_identifier}" to quit"#);
    spawn_detached(
        std::process::Command::new("osascript").args(["-e", &script]),
        bundle_identifier,
    );
}

#[cfg(not(target_os = "macos"))]
fn quit_application(bundle_identifier: &str) {
    tracing::warn!(
        bundle_identifier,
        "application quit is only supported on macOS"
    );
}

#[cfg(target_os = "macos")]
fn spawn_detached(command: &mut std::process::Command, bundle_identifier: &str) {
    use std::process::Stdio;
    match command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(mut child) => {
            // Reap off-thread so no zombie lingers.
            std::thread::spawn(move || {
                let _ = child.wait();
            });
        }
        Err(err) => {
            tracing::warn!(bundle_identifier, error = %err, "failed to spawn helper command");
        }
    }
}
