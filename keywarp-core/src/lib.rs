//! keywarp core library — domain types, configuration, paths, errors.
//!
//! Shared between the session agent and any future suite binaries:
//! - [`types`] — values crossing the grabber channel and read from disk
//! - [`config`] — user core configuration schema + loading
//! - [`paths`] — filesystem locations and bundle identifiers
//! - [`error`] — [`ConfigError`]

pub mod config;
pub mod error;
pub mod paths;
pub mod types;

pub use config::{CoreConfiguration, GlobalConfiguration};
pub use error::ConfigError;
pub use types::{
    FrontmostApplication, GrabberAlerts, InputSourceIdentifiers, SystemPreferences,
};
