//! Command socket.
//!
//! Clients connect to a Unix socket and write one command per line. Each
//! command is executed on the dispatch loop and answered with a single JSON
//! line: `{"ok":true,"result":...}` or `{"ok":false,"error":"..."}`.

use crate::backend::Window;
use crate::client::Client;
use crate::dispatch::{DispatchError, ExecHandle};
use crate::wm::Wm;
use serde::Serialize;
use serde_json::{Value, json};
use std::io;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Errors from parsing or executing a command.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Empty command")]
    Empty,

    #[error("Unknown command: {0}")]
    Unknown(String),

    #[error("{command} expects an argument: {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },

    #[error("Unexpected argument: {0}")]
    UnexpectedArgument(String),

    #[error("Invalid window id: {0}")]
    InvalidWindow(String),

    #[error("Window {0:#x} is not managed")]
    UnknownWindow(Window),

    #[error("No such workspace: {0}")]
    UnknownWorkspace(String),

    #[error("Failed to encode result: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// A command accepted on the command socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Raise and focus a managed window.
    Focus(Window),
    /// Focus the most recent client visible on the active workspace.
    FocusFallback,
    /// Park focus on the placeholder window.
    FocusRoot,
    /// Report the focused client.
    GetActive,
    /// List managed clients, least recently focused first.
    GetClients,
    /// Switch workspace by name, or by zero-based index when no workspace
    /// has that name.
    Workspace(String),
    /// Iconify a managed window.
    Iconify(Window),
}

/// Parse a window id in decimal or `0x` hexadecimal.
fn parse_window(s: &str) -> Result<Window, CommandError> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => Window::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| CommandError::InvalidWindow(s.to_string()))
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let name = words.next().ok_or(CommandError::Empty)?;
        let argument = words.next();
        if let Some(extra) = words.next() {
            return Err(CommandError::UnexpectedArgument(extra.to_string()));
        }

        let window = |command| {
            argument
                .ok_or(CommandError::MissingArgument {
                    command,
                    argument: "window",
                })
                .and_then(parse_window)
        };

        let command = match name {
            "Focus" => Self::Focus(window("Focus")?),
            "Iconify" => Self::Iconify(window("Iconify")?),
            "Workspace" => Self::Workspace(
                argument
                    .ok_or(CommandError::MissingArgument {
                        command: "Workspace",
                        argument: "workspace",
                    })?
                    .to_string(),
            ),
            "FocusFallback" | "FocusRoot" | "GetActive" | "GetClients" => {
                if let Some(argument) = argument {
                    return Err(CommandError::UnexpectedArgument(argument.to_string()));
                }
                match name {
                    "FocusFallback" => Self::FocusFallback,
                    "FocusRoot" => Self::FocusRoot,
                    "GetActive" => Self::GetActive,
                    _ => Self::GetClients,
                }
            }
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

impl Command {
    /// Run the command against the window manager state.
    pub fn execute(self, wm: &mut Wm) -> Result<Value, CommandError> {
        match self {
            Self::Focus(window) => {
                if !wm.focus_window(window) {
                    return Err(CommandError::UnknownWindow(window));
                }
                Ok(Value::Null)
            }
            Self::FocusFallback => {
                wm.focus_fallback();
                Ok(Value::Null)
            }
            Self::FocusRoot => {
                wm.focus().root();
                Ok(Value::Null)
            }
            Self::GetActive => Ok(wm
                .active_client()
                .map_or(Value::Null, |c| json!(c.id()))),
            Self::GetClients => Ok(serde_json::to_value(wm.summaries())?),
            Self::Workspace(target) => {
                let desktop = &wm.env().desktop;
                let index = desktop
                    .find_workspace(&target)
                    .or_else(|| {
                        target
                            .parse::<usize>()
                            .ok()
                            .filter(|&i| i < desktop.workspace_count())
                    })
                    .ok_or_else(|| CommandError::UnknownWorkspace(target.clone()))?;
                let name = desktop.workspace_name(index).unwrap_or(target);
                wm.set_workspace(index, true);
                Ok(json!(name))
            }
            Self::Iconify(window) => {
                if wm.client(window).is_none() {
                    return Err(CommandError::UnknownWindow(window));
                }
                Ok(json!(wm.iconify(window)))
            }
        }
    }
}

/// One response line.
#[derive(Debug, Serialize)]
struct Response {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<Result<Value, CommandError>> for Response {
    fn from(result: Result<Value, CommandError>) -> Self {
        match result {
            Ok(value) => Self {
                ok: true,
                result: Some(value),
                error: None,
            },
            Err(e) => Self {
                ok: false,
                result: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Bind a listener at `path`, replacing a stale socket and creating the
/// parent directory.
pub fn bind(path: &Path) -> io::Result<UnixListener> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed stale socket {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    UnixListener::bind(path)
}

/// Remove a socket file, ignoring a missing one.
pub fn unlink(path: &Path) {
    if let Err(e) = std::fs::remove_file(path)
        && e.kind() != io::ErrorKind::NotFound
    {
        warn!("Failed to remove socket {}: {}", path.display(), e);
    }
}

/// Serve commands on `path` until `shutdown` is cancelled.
pub async fn serve(path: &Path, exec: ExecHandle<Wm>, shutdown: CancellationToken) -> io::Result<()> {
    let listener = bind(path)?;
    info!("Command socket listening on {}", path.display());

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    debug!("Command client connected");
                    tokio::spawn(handle_connection(stream, exec.clone(), shutdown.clone()));
                }
                Err(e) => warn!("Failed to accept command client: {}", e),
            },
        }
    }

    drop(listener);
    unlink(path);
    Ok(())
}

async fn handle_connection(stream: UnixStream, exec: ExecHandle<Wm>, shutdown: CancellationToken) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = tokio::select! {
            () = shutdown.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                debug!("Command client read failed: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        trace!("Command: {}", line);
        let result = match line.parse::<Command>() {
            Ok(command) => exec
                .exec(move |wm| command.execute(wm))
                .await
                .map_err(CommandError::from)
                .and_then(|result| result),
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            debug!("Command '{}' failed: {}", line.trim(), e);
        }

        let mut encoded = match serde_json::to_string(&Response::from(result)) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("Failed to encode response: {}", e);
                continue;
            }
        };
        encoded.push('\n');
        if let Err(e) = writer.write_all(encoded.as_bytes()).await {
            debug!("Command client disconnected: {}", e);
            break;
        }
    }
}
