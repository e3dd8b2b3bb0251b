//! Wire protocol between the session agent and the grabber.
//!
//! Both channels speak newline-delimited JSON. [`SessionRequest`] travels
//! over the outbound client channel; [`GrabberRequest`] arrives on the
//! inbound binding channel.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use keywarp_core::types::{InputSourceIdentifiers, SystemPreferences};

/// Requests the session agent sends to the grabber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionRequest {
    /// Announces this process on a freshly-connected session endpoint.
    ConnectSessionEndpoint { uid: u32, pid: u32 },
    SystemPreferencesUpdated {
        system_preferences: SystemPreferences,
    },
    FrontmostApplicationChanged {
        bundle_identifier: Option<String>,
        file_path: Option<PathBuf>,
    },
    InputSourceChanged {
        input_source: InputSourceIdentifiers,
    },
}

/// Requests the grabber sends to the session agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GrabberRequest {
    /// Run a user-session shell command on the grabber's behalf (the
    /// privileged process must not execute user commands itself).
    ShellCommandExecution { command: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_request_wire_format_is_stable() {
        let request = SessionRequest::ConnectSessionEndpoint { uid: 501, pid: 42 };
        let line = serde_json::to_string(&request).expect("encode");
        assert_eq!(
            line,
            r#"{"type":"connect_session_endpoint","uid":501,"pid":42}"#
        );
    }

    #[test]
    fn system_preferences_request_roundtrip() {
        let request = SessionRequest::SystemPreferencesUpdated {
            system_preferences: SystemPreferences {
                use_fkeys_as_standard_function_keys: true,
                scroll_direction_is_natural: false,
            },
        };
        let line = serde_json::to_string(&request).expect("encode");
        let decoded: SessionRequest = serde_json::from_str(&line).expect("decode");
        assert_eq!(decoded, request);
    }

    #[test]
    fn grabber_request_decodes_from_snake_case_tag() {
        let decoded: GrabberRequest = serde_json::from_str(
            r#"{"type":"shell_command_execution","command":"open /tmp"}"#,
        )
        .expect("decode");
        assert_eq!(
            decoded,
            GrabberRequest::ShellCommandExecution {
                command: "open /tmp".to_string()
            }
        );
    }

    #[test]
    fn frontmost_application_request_carries_optional_fields() {
        let request = SessionRequest::FrontmostApplicationChanged {
            bundle_identifier: None,
            file_path: None,
        };
        let line = serde_json::to_string(&request).expect("encode");
        let decoded: SessionRequest = serde_json::from_str(&line).expect("decode");
        assert_eq!(decoded, request);
    }
}
