//! keywarp session agent: the user-session companion of the keywarp grabber.
//!
//! The library is a lifecycle orchestrator: it tracks the console session
//! owner, runs the two-sided IPC handshake with the privileged grabber
//! process, and supervises the session-scoped child components whose
//! lifetime is tied to a connected grabber channel.

pub mod agent;
pub mod alerts;
pub mod config_monitor;
mod error;
pub mod grabber_client;
pub mod launchd;
pub mod launcher;
pub mod observers;
pub mod process_managers;
pub mod protocol;
pub mod queue;
pub mod receiver;
pub mod session_monitor;
mod tasks;
pub mod version;

pub use agent::{current_uid, AgentOptions, AgentStatus, Intervals, Probes, SessionAgent};
pub use error::SessionError;
