//! Public-API tests for configuration loading and the user directory layout.

use keywarp_core::config::{
    ensure_user_configuration_directory, load_core_configuration, CoreConfiguration,
};
use keywarp_core::paths;
use tempfile::TempDir;

#[test]
fn configuration_round_trips_through_the_canonical_path() {
    let home = TempDir::new().expect("home");
    let dir = ensure_user_configuration_directory(home.path()).expect("config dir");
    let path = paths::core_configuration_path(home.path());
    assert_eq!(path.parent(), Some(dir.as_path()));

    let mut config = CoreConfiguration::default();
    config.global.show_icon_in_menu_bar = false;
    std::fs::write(&path, serde_json::to_string_pretty(&config).expect("encode"))
        .expect("write");

    let loaded = load_core_configuration(&path).expect("load");
    assert_eq!(loaded, config);
}

#[test]
fn unknown_fields_are_tolerated() {
    let home = TempDir::new().expect("home");
    ensure_user_configuration_directory(home.path()).expect("config dir");
    let path = paths::core_configuration_path(home.path());

    // A file written by a newer release carries fields this build has never
    // heard of.
    std::fs::write(
        &path,
        r#"{"global":{"show_icon_in_menu_bar":false,"ask_for_confirmation_before_quitting":true},"profiles":[]}"#,
    )
    .expect("write");

    let loaded = load_core_configuration(&path).expect("load");
    assert!(!loaded.global.show_icon_in_menu_bar);
    assert!(loaded.global.check_for_updates_on_startup);
}

#[test]
fn per_uid_socket_paths_do_not_collide() {
    let root = TempDir::new().expect("root");
    let a = paths::session_agent_socket_path(root.path(), 501);
    let b = paths::session_agent_socket_path(root.path(), 502);
    assert_ne!(a, b);
    assert_ne!(a, paths::grabber_session_endpoint_path(root.path(), 501));
}
