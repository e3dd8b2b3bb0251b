//! Domain types shared between the session agent and its collaborators.
//!
//! Everything that crosses the grabber channel or is read from disk is
//! serializable via serde + serde_json; the on-disk and wire formats of the
//! keywarp suite are JSON throughout.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// System preferences relevant to remapping, as observed in the user session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemPreferences {
    pub use_fkeys_as_standard_function_keys: bool,
    pub scroll_direction_is_natural: bool,
}

impl Default for SystemPreferences {
    fn default() -> Self {
        Self {
            use_fkeys_as_standard_function_keys: false,
            scroll_direction_is_natural: true,
        }
    }
}

/// Identifiers of the keyboard input source selected in the user session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct InputSourceIdentifiers {
    pub language: Option<String>,
    pub input_source_id: Option<String>,
    pub input_mode_id: Option<String>,
}

impl fmt::Display for InputSourceIdentifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "language:{}, input_source_id:{}, input_mode_id:{}",
            self.language.as_deref().unwrap_or("-"),
            self.input_source_id.as_deref().unwrap_or("-"),
            self.input_mode_id.as_deref().unwrap_or("-"),
        )
    }
}

/// The application frontmost in the user session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrontmostApplication {
    pub bundle_identifier: Option<String>,
    pub file_path: Option<PathBuf>,
}

/// Contents of the grabber's alerts status file. An empty list means "no
/// active alert".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GrabberAlerts {
    pub alerts: Vec<String>,
}
