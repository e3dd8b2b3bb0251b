//! Configuration-driven process managers for the menu app and the updater.
//!
//! Pure dependents of the configuration monitor: they subscribe at
//! construction and react to configuration loads, nothing else talks to
//! them. Both are torn down with the child component set.

use crate::config_monitor::ConfigurationMonitor;
use crate::launcher;
use crate::tasks::ScopedTask;

/// Keeps the menu bar app aligned with `global.show_icon_in_menu_bar`.
pub struct MenuProcessManager {
    _task: ScopedTask,
}

impl MenuProcessManager {
    pub fn new(configuration: &ConfigurationMonitor) -> Self {
        let mut config_rx = configuration.subscribe();
        let task = ScopedTask::spawn(async move {
            let mut session = MenuSession::default();
            while config_rx.changed().await.is_ok() {
                let visible = config_rx.borrow_and_update().global.show_icon_in_menu_bar;
                session.set_visible(visible);
            }
        });
        Self { _task: task }
    }
}

/// Tracks whether we launched the menu app, so teardown only quits what we
/// started.
#[derive(Default)]
struct MenuSession {
    launched: bool,
}

impl MenuSession {
    fn set_visible(&mut self, visible: bool) {
        if visible && !self.launched {
            self.launched = true;
            launcher::launch_menu();
        } else if !visible && self.launched {
            self.launched = false;
            launcher::quit_menu();
        }
    }
}

impl Drop for MenuSession {
    fn drop(&mut self) {
        if self.launched {
            launcher::quit_menu();
        }
    }
}

/// Launches the updater once, if the first observed configuration asks for a
/// startup check.
pub struct UpdaterProcessManager {
    _task: ScopedTask,
}

impl UpdaterProcessManager {
    pub fn new(configuration: &ConfigurationMonitor) -> Self {
        let mut config_rx = configuration.subscribe();
        let task = ScopedTask::spawn(async move {
            if config_rx.changed().await.is_ok()
                && config_rx
                    .borrow_and_update()
                    .global
                    .check_for_updates_on_startup
            {
                launcher::launch_updater();
            }
        });
        Self { _task: task }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn menu_session_launch_and_quit_are_edge_triggered() {
        let mut session = MenuSession::default();
        session.set_visible(true);
        assert!(session.launched);
        session.set_visible(true);
        assert!(session.launched, "repeat show is a no-op");
        session.set_visible(false);
        assert!(!session.launched);
        session.set_visible(false);
        assert!(!session.launched, "repeat hide is a no-op");
    }
}
