//! Window manager notifications.
//!
//! Lifecycle transitions are published on an in-process broadcast bus. The
//! notifier forwards them to subscribers on a Unix socket, one JSON object
//! per line.

use crate::backend::Window;
use serde::Serialize;
use std::io;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// A window manager notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event")]
pub enum Event {
    ManagedClient {
        id: Window,
    },
    FocusedClient {
        id: Window,
    },
    UnfocusedClient {
        id: Window,
    },
    /// `id` is 0 when no client is active.
    ChangedActiveClient {
        id: Window,
    },
    ChangedWorkspace {
        workspace: String,
    },
    /// Carries metadata captured before the client was torn down.
    UnmanagedClient {
        id: Window,
        name: String,
        workspace: String,
        class: String,
        instance: String,
    },
}

/// Broadcast bus for [`Event`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Events with no subscriber are dropped.
    pub fn notify(&self, event: Event) {
        trace!("Event: {:?}", event);
        if self.tx.send(event).is_err() {
            trace!("No event subscribers");
        }
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

/// Serve events to subscribers on `path` until `shutdown` is cancelled.
pub async fn serve(bus: EventBus, path: &Path, shutdown: CancellationToken) -> io::Result<()> {
    let listener = crate::ipc::bind(path)?;
    info!("Event notifier listening on {}", path.display());

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    debug!("Event subscriber connected");
                    tokio::spawn(forward(stream, bus.subscribe(), shutdown.clone()));
                }
                Err(e) => warn!("Failed to accept event subscriber: {}", e),
            },
        }
    }

    drop(listener);
    crate::ipc::unlink(path);
    Ok(())
}

/// Write events to one subscriber until it disconnects.
async fn forward(
    mut stream: UnixStream,
    mut rx: broadcast::Receiver<Event>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = shutdown.cancelled() => break,
            event = rx.recv() => event,
        };

        let event = match event {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!("Event subscriber lagged, skipped {} events", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let line = match encode(&event) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to encode event {:?}: {}", event, e);
                continue;
            }
        };

        if let Err(e) = stream.write_all(line.as_bytes()).await {
            debug!("Event subscriber disconnected: {}", e);
            break;
        }
    }
}

/// Encode an event as a single JSON line.
fn encode(event: &Event) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(event)?;
    line.push('\n');
    Ok(line)
}
