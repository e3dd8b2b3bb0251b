//! Inbound binding channel: the per-user socket the grabber connects to.
//!
//! Binding this socket is the first half of the IPC handshake. A successful
//! bind tells the orchestrator the session endpoint is worth connecting to;
//! requests arriving on accepted connections are grabber-initiated work
//! (currently shell command execution in the user session).

use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

use crate::protocol::GrabberRequest;
use crate::tasks::ScopedTask;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverEvent {
    /// The session agent socket is bound and accepting grabber connections.
    Bound,
    BindFailed(i32),
    Closed,
}

/// Listens on the per-user session agent socket.
pub struct Receiver {
    socket_path: PathBuf,
    events: mpsc::UnboundedSender<ReceiverEvent>,
    task: Option<ScopedTask>,
}

impl Receiver {
    pub fn new(socket_path: PathBuf) -> (Self, mpsc::UnboundedReceiver<ReceiverEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                socket_path,
                events,
                task: None,
            },
            events_rx,
        )
    }

    /// Bind the socket and serve grabber connections until dropped.
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }
        let socket_path = self.socket_path.clone();
        let events = self.events.clone();
        self.task = Some(ScopedTask::spawn(serve(socket_path, events)));
    }
}

async fn serve(socket_path: PathBuf, events: mpsc::UnboundedSender<ReceiverEvent>) {
    if let Err(err) = prepare_socket_for_bind(&socket_path) {
        tracing::error!(
            socket = %socket_path.display(),
            error = %err,
            "session agent socket is unavailable",
        );
        let _ = events.send(ReceiverEvent::BindFailed(err.raw_os_error().unwrap_or(-1)));
        return;
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(
                socket = %socket_path.display(),
                error = %err,
                "session agent socket bind failed",
            );
            let _ = events.send(ReceiverEvent::BindFailed(err.raw_os_error().unwrap_or(-1)));
            return;
        }
    };

    if let Err(err) = set_socket_permissions(&socket_path) {
        tracing::warn!(
            socket = %socket_path.display(),
            error = %err,
            "failed to restrict session agent socket permissions",
        );
    }

    tracing::info!(socket = %socket_path.display(), "session agent socket bound");
    let _ = events.send(ReceiverEvent::Bound);

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                tracing::debug!("grabber connected to session agent socket");
                handle_grabber_connection(stream).await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "session agent socket closed");
                let _ = events.send(ReceiverEvent::Closed);
                break;
            }
        }
    }

    let _ = fs::remove_file(&socket_path);
}

async fn handle_grabber_connection(stream: UnixStream) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<GrabberRequest>(&line) {
                    Ok(request) => dispatch(request),
                    Err(err) => {
                        tracing::warn!(error = %err, "unrecognized grabber request")
                    }
                }
            }
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(error = %err, "grabber connection read failed");
                break;
            }
        }
    }
    tracing::debug!("grabber disconnected from session agent socket");
}

fn dispatch(request: GrabberRequest) {
    match request {
        GrabberRequest::ShellCommandExecution { command } => {
            tracing::info!(%command, "executing shell command for grabber");
            match tokio::process::Command::new("/bin/sh")
                .arg("-c")
                .arg(&command)
                .spawn()
            {
                // Reap in the background; the exit status is not interesting.
                Ok(mut child) => {
                    tokio::spawn(async move {
                        let _ = child.wait().await;
                    });
                }
                Err(err) => tracing::warn!(error = %err, "failed to spawn shell command"),
            }
        }
    }
}

/// Remove a stale socket left by a previous agent, but refuse to steal a
/// live one. Creates the run directory on first use.
fn prepare_socket_for_bind(socket: &Path) -> std::io::Result<()> {
    if !socket.exists() {
        if let Some(parent) = socket.parent() {
            fs::create_dir_all(parent)?;
        }
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => Err(std::io::Error::new(
            ErrorKind::AddrInUse,
            "session agent socket already in use",
        )),
        Err(_) => {
            tracing::warn!(
                socket = %socket.display(),
                "removing stale session agent socket",
            );
            match fs::remove_file(socket) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err),
            }
        }
    }
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
