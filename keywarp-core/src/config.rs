//! User core configuration: schema and loading.
//!
//! The configuration lives at `<home>/.config/keywarp/keywarp.json`. A missing
//! file yields the default configuration; unknown or missing fields fall back
//! to their defaults so older and newer files both load.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};
use crate::paths;

/// Global (profile-independent) settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfiguration {
    pub check_for_updates_on_startup: bool,
    pub show_icon_in_menu_bar: bool,
    pub show_profile_name_in_menu_bar: bool,
}

impl Default for GlobalConfiguration {
    fn default() -> Self {
        Self {
            check_for_updates_on_startup: true,
            show_icon_in_menu_bar: true,
            show_profile_name_in_menu_bar: false,
        }
    }
}

/// Root of the user core configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CoreConfiguration {
    pub global: GlobalConfiguration,
}

/// Load the core configuration from `path`.
///
/// A missing file is not an error; it returns the default configuration.
/// A malformed file returns [`ConfigError::Parse`] with path context so the
/// caller can report it and keep its previous value.
pub fn load_core_configuration(path: &Path) -> Result<CoreConfiguration, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(CoreConfiguration::default());
        }
        Err(err) => return Err(io_err(path, err)),
    };

    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Create `<home>/.config/keywarp` (mode `0700`) if absent. Idempotent.
pub fn ensure_user_configuration_directory(home: &Path) -> Result<PathBuf, ConfigError> {
    let dir = paths::user_configuration_directory(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|err| io_err(&dir, err))?;
        set_dir_permissions(&dir)?;
    }
    Ok(dir)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|err| io_err(path, err))
}

#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_loads_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let config =
            load_core_configuration(&dir.path().join("keywarp.json")).expect("load");
        assert_eq!(config, CoreConfiguration::default());
        assert!(config.global.check_for_updates_on_startup);
        assert!(config.global.show_icon_in_menu_bar);
        assert!(!config.global.show_profile_name_in_menu_bar);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("keywarp.json");
        std::fs::write(&path, r#"{"global":{"show_icon_in_menu_bar":false}}"#).expect("write");

        let config = load_core_configuration(&path).expect("load");
        assert!(!config.global.show_icon_in_menu_bar);
        assert!(config.global.check_for_updates_on_startup, "untouched default");
    }

    #[test]
    fn malformed_file_is_a_parse_error_with_path() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("keywarp.json");
        std::fs::write(&path, "{not json").expect("write");

        let err = load_core_configuration(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("keywarp.json"));
    }

    #[test]
    fn user_configuration_directory_created_with_restrictive_mode() {
        let home = TempDir::new().expect("tempdir");
        let dir = ensure_user_configuration_directory(home.path()).expect("create");
        assert!(dir.exists());
        assert!(dir.ends_with(".config/keywarp"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o700);
        }

        // Second call is a no-op.
        ensure_user_configuration_directory(home.path()).expect("idempotent");
    }
}
