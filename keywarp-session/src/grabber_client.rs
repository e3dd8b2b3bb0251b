//! Outbound client channel to the grabber's per-session endpoint.
//!
//! The second half of the IPC handshake. All send operations are
//! fire-and-forget: they enqueue a request onto the connection task, and a
//! request sent while the channel is down is silently dropped (a normal race
//! between observer events and the client lifecycle, not an error).

use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixStream;
use tokio::sync::mpsc;

use keywarp_core::types::{InputSourceIdentifiers, SystemPreferences};

use crate::protocol::SessionRequest;
use crate::tasks::ScopedTask;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrabberClientEvent {
    Connected,
    ConnectFailed(i32),
    Closed,
}

/// Active connection to the grabber session endpoint.
///
/// Shared ownership: the orchestrator holds it behind an `Arc` and in-flight
/// callbacks may hold clones; the connection task itself dies with the value.
pub struct GrabberClient {
    endpoint: PathBuf,
    requests: mpsc::UnboundedSender<SessionRequest>,
    pending_requests: Option<mpsc::UnboundedReceiver<SessionRequest>>,
    events: mpsc::UnboundedSender<GrabberClientEvent>,
    task: Option<ScopedTask>,
}

impl GrabberClient {
    pub fn new(endpoint: PathBuf) -> (Self, mpsc::UnboundedReceiver<GrabberClientEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (requests, requests_rx) = mpsc::unbounded_channel();
        (
            Self {
                endpoint,
                requests,
                pending_requests: Some(requests_rx),
                events,
                task: None,
            },
            events_rx,
        )
    }

    /// Connect to the session endpoint. A failure is terminal for this
    /// client instance; recovery happens by replacing the instance.
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }
        let Some(requests_rx) = self.pending_requests.take() else {
            return;
        };
        let endpoint = self.endpoint.clone();
        let events = self.events.clone();
        self.task = Some(ScopedTask::spawn(run(endpoint, requests_rx, events)));
    }

    /// Announce this session agent on the freshly-connected channel.
    pub fn connect_session_endpoint(&self, uid: u32) {
        let _ = self.requests.send(SessionRequest::ConnectSessionEndpoint {
            uid,
            pid: std::process::id(),
        });
    }

    pub fn system_preferences_updated(&self, system_preferences: SystemPreferences) {
        let _ = self
            .requests
            .send(SessionRequest::SystemPreferencesUpdated { system_preferences });
    }

    pub fn frontmost_application_changed(
        &self,
        bundle_identifier: Option<String>,
        file_path: Option<PathBuf>,
    ) {
        let _ = self.requests.send(SessionRequest::FrontmostApplicationChanged {
            bundle_identifier,
            file_path,
        });
    }

    pub fn input_source_changed(&self, input_source: InputSourceIdentifiers) {
        let _ = self
            .requests
            .send(SessionRequest::InputSourceChanged { input_source });
    }
}

async fn run(
    endpoint: PathBuf,
    mut requests: mpsc::UnboundedReceiver<SessionRequest>,
    events: mpsc::UnboundedSender<GrabberClientEvent>,
) {
    let stream = match UnixStream::connect(&endpoint).await {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!(
                endpoint = %endpoint.display(),
                error = %err,
                "grabber session endpoint connect failed",
            );
            let _ = events.send(GrabberClientEvent::ConnectFailed(
                err.raw_os_error().unwrap_or(-1),
            ));
            return;
        }
    };

    tracing::info!(endpoint = %endpoint.display(), "connected to grabber session endpoint");
    let _ = events.send(GrabberClientEvent::Connected);

    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        tokio::select! {
            request = requests.recv() => {
                let Some(request) = request else { break };
                let payload = match serde_json::to_string(&request) {
                    Ok(payload) => payload,
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to encode grabber request");
                        continue;
                    }
                };
                if let Err(err) = write_line(&mut writer, &payload).await {
                    tracing::warn!(error = %err, "grabber channel write failed");
                    let _ = events.send(GrabberClientEvent::Closed);
                    return;
                }
            }
            line = lines.next_line() => {
                match line {
                    // The grabber sends nothing on this channel today; reads
                    // only detect the peer going away.
                    Ok(Some(_)) => {}
                    Ok(None) | Err(_) => {
                        tracing::warn!(endpoint = %endpoint.display(), "grabber session endpoint closed");
                        let _ = events.send(GrabberClientEvent::Closed);
                        return;
                    }
                }
            }
        }
    }
}

async fn write_line(writer: &mut OwnedWriteHalf, payload: &str) -> std::io::Result<()> {
    writer.write_all(payload.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::net::UnixListener;
    use tokio::time::timeout;

    async fn next_event(
        rx: &mut mpsc::UnboundedReceiver<GrabberClientEvent>,
    ) -> GrabberClientEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event within deadline")
            .expect("client alive")
    }

    #[tokio::test]
    async fn connect_without_endpoint_emits_connect_failed() {
        let dir = TempDir::new().expect("tempdir");
        let (mut client, mut events) =
            GrabberClient::new(dir.path().join("grabber_session.501.sock"));
        client.start();
        assert!(matches!(
            next_event(&mut events).await,
            GrabberClientEvent::ConnectFailed(_)
        ));
    }

    #[tokio::test]
    async fn requests_reach_the_endpoint_as_json_lines() {
        let dir = TempDir::new().expect("tempdir");
        let endpoint = dir.path().join("grabber_session.501.sock");
        let listener = UnixListener::bind(&endpoint).expect("bind fake grabber");

        let (mut client, mut events) = GrabberClient::new(endpoint);
        client.start();

        let (stream, _) = timeout(Duration::from_secs(5), listener.accept())
            .await
            .expect("accept within deadline")
            .expect("accept");
        assert_eq!(next_event(&mut events).await, GrabberClientEvent::Connected);

        client.connect_session_endpoint(501);
        client.system_preferences_updated(SystemPreferences::default());

        let mut lines = BufReader::new(stream).lines();
        let first = timeout(Duration::from_secs(5), lines.next_line())
            .await
            .expect("line within deadline")
            .expect("read")
            .expect("line");
        let decoded: SessionRequest = serde_json::from_str(&first).expect("decode");
        assert!(matches!(
            decoded,
            SessionRequest::ConnectSessionEndpoint { uid: 501, .. }
        ));

        let second = timeout(Duration::from_secs(5), lines.next_line())
            .await
            .expect("line within deadline")
            .expect("read")
            .expect("line");
        let decoded: SessionRequest = serde_json::from_str(&second).expect("decode");
        assert!(matches!(
            decoded,
            SessionRequest::SystemPreferencesUpdated { .. }
        ));
    }

    #[tokio::test]
    async fn peer_disconnect_emits_closed() {
        let dir = TempDir::new().expect("tempdir");
        let endpoint = dir.path().join("grabber_session.501.sock");
        let listener = UnixListener::bind(&endpoint).expect("bind fake grabber");

        let (mut client, mut events) = GrabberClient::new(endpoint);
        client.start();

        let (stream, _) = timeout(Duration::from_secs(5), listener.accept())
            .await
            .expect("accept within deadline")
            .expect("accept");
        assert_eq!(next_event(&mut events).await, GrabberClientEvent::Connected);

        drop(stream);
        assert_eq!(next_event(&mut events).await, GrabberClientEvent::Closed);
    }

    #[tokio::test]
    async fn sends_after_the_client_is_gone_are_dropped() {
        let dir = TempDir::new().expect("tempdir");
        let (mut client, _events) =
            GrabberClient::new(dir.path().join("grabber_session.501.sock"));
        client.start();
        // Must not panic even though the connection task has long failed.
        client.input_source_changed(InputSourceIdentifiers::default());
    }
}
