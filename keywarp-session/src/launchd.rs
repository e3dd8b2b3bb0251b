//! LaunchAgent management for the session agent binary.
//!
//! The agent must run inside the user's Aqua session (it observes the
//! frontmost application and launches UI helpers), so the plist is limited
//! to the Aqua session type and bootstrapped into the `gui/<uid>` domain.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use keywarp_core::paths::{launch_agents_dir, launchd_plist_path, SESSION_AGENT_LABEL};

use crate::agent::current_uid;
use crate::error::{io_err, SessionError};

/// Render the LaunchAgent plist for the session agent.
pub fn generate_plist(binary_path: &Path, log_dir: &Path) -> String {
    let stdout = log_dir.join("session-agent.log").display().to_string();
    let stderr = log_dir.join("session-agent-err.log").display().to_string();
    let binary = binary_path.display().to_string();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
  <key>Label</key>
  <string>{SESSION_AGENT_LABEL}</string>
  <key>ProgramArguments</key>
  <array>
    <string>{binary}</string>
    <string>run</string>
  </array>
  <key>LimitLoadToSessionType</key>
  <string>Aqua</string>
  <key>RunAtLoad</key>
  <true/>
  <key>KeepAlive</key>
  <true/>
  <key>StandardOutPath</key>
  <string>{stdout}</string>
  <key>StandardErrorPath</key>
  <string>{stderr}</string>
</dict>
</plist>
"#
    )
}

/// Write the plist and (re)start the agent in the current gui domain.
pub fn install(home: &Path) -> Result<PathBuf, SessionError> {
    ensure_macos()?;

    let launch_agents = launch_agents_dir(home);
    if !launch_agents.exists() {
        fs::create_dir_all(&launch_agents).map_err(|err| io_err(&launch_agents, err))?;
    }
    let logs = keywarp_core::paths::user_log_directory(home);
    if !logs.exists() {
        fs::create_dir_all(&logs).map_err(|err| io_err(&logs, err))?;
    }

    let binary = std::env::current_exe().map_err(|err| io_err("current_exe", err))?;
    let plist = launchd_plist_path(home);
    fs::write(&plist, generate_plist(&binary, &logs)).map_err(|err| io_err(&plist, err))?;

    let domain = format!("gui/{}", current_uid());
    let service = format!("{domain}/{SESSION_AGENT_LABEL}");

    // A previous registration may or may not exist.
    let _ = launchctl(&["bootout", &service]);
    launchctl(&["bootstrap", &domain, &plist.display().to_string()])?;
    launchctl(&["kickstart", "-k", &service])?;

    Ok(plist)
}

/// Stop the agent and remove its plist.
pub fn uninstall(home: &Path) -> Result<(), SessionError> {
    ensure_macos()?;

    let plist = launchd_plist_path(home);
    if plist.exists() {
        let service = format!("gui/{}/{SESSION_AGENT_LABEL}", current_uid());
        let _ = launchctl(&["bootout", &service]);
        fs::remove_file(&plist).map_err(|err| io_err(&plist, err))?;
    }
    Ok(())
}

#[cfg(target_os = "macos")]
fn ensure_macos() -> Result<(), SessionError> {
    Ok(())
}

#[cfg(not(target_os = "macos"))]
fn ensure_macos() -> Result<(), SessionError> {
    Err(SessionError::Launchd(
        "LaunchAgent management is only supported on macOS".to_string(),
    ))
}

fn launchctl(args: &[&str]) -> Result<(), SessionError> {
    let output = Command::new("launchctl")
        .args(args)
        .output()
        .map_err(|err| io_err("launchctl", err))?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    Err(SessionError::Launchd(format!(
        "launchctl {} failed (status {}): {stderr}",
        args.first().copied().unwrap_or(""),
        output.status,
    )))
}
