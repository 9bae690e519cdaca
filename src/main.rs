//! focuswm - small X11 window manager.
//!
//! Manages top-level windows, tracks input focus per ICCCM/EWMH and exposes a
//! command socket and an event socket.

use focuswm::backend::{WindowSystem, X11Backend};
use focuswm::config::Config;
use focuswm::desktop::Desktop;
use focuswm::dispatch::Dispatcher;
use focuswm::event::{self, EventBus};
use focuswm::hook::{Hook, Hooks};
use focuswm::ipc;
use focuswm::wm::Wm;
use focuswm::xclient::ClientEnv;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Capacity of the channel between the X event reader and the dispatch loop.
const WINDOW_EVENT_QUEUE: usize = 256;

/// Small X11 window manager.
#[derive(Parser, Debug)]
#[command(name = "focuswm")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// X display to manage (defaults to $DISPLAY).
    #[arg(long)]
    display: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level)?;

    info!("focuswm v{} starting", env!("CARGO_PKG_VERSION"));

    let config =
        Config::load_or_default(args.config.as_deref()).context("Failed to load configuration")?;
    info!(
        "Configuration loaded ({} workspaces)",
        config.workspaces.len()
    );

    let backend = Arc::new(
        X11Backend::connect(args.display.as_deref()).context("Failed to start window manager")?,
    );

    run(config, backend).await
}

/// Initialize logging with the specified level.
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(format!("focuswm={level}"))
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Invalid log level")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    Ok(())
}

/// Wire up the components and run the dispatch loop until shutdown.
async fn run(config: Config, backend: Arc<X11Backend>) -> Result<()> {
    let shutdown = CancellationToken::new();
    let conn: Arc<dyn WindowSystem> = backend.clone();

    let events = EventBus::new(config.event_queue_capacity);
    let (hooks, hook_runner) = Hooks::new(config.hooks.clone());
    let desktop = Arc::new(Desktop::new(
        Arc::clone(&conn),
        events.clone(),
        config.workspaces.clone(),
    ));
    let env = ClientEnv {
        conn,
        desktop,
        events: events.clone(),
        hooks: hooks.clone(),
    };

    let mut wm = Wm::new(env, config.focus_new_clients);
    wm.manage_existing();
    wm.apply_struts();
    wm.focus_fallback();

    tokio::spawn(hook_runner.run());
    hooks.fire(Hook::Startup, 0);

    let (dispatcher, exec) = Dispatcher::new(config.exec_queue_capacity, shutdown.clone());

    let command_socket = config.command_socket_path();
    let command_server = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = ipc::serve(&command_socket, exec, shutdown).await {
                error!(
                    "Command socket {} failed: {}",
                    command_socket.display(),
                    e
                );
            }
        }
    });

    let event_socket = config.event_socket_path();
    let event_server = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = event::serve(events, &event_socket, shutdown).await {
                error!("Event socket {} failed: {}", event_socket.display(), e);
            }
        }
    });

    tokio::spawn(wait_for_signal(shutdown.clone()));

    let (event_tx, event_rx) = mpsc::channel(WINDOW_EVENT_QUEUE);
    backend
        .spawn_event_reader(event_tx, shutdown.clone())
        .context("Failed to start X event reader")?;

    info!("Window manager running");
    dispatcher.run(&mut wm, event_rx, Wm::handle_event).await;

    // Let the socket tasks remove their files
    shutdown.cancel();
    for task in [command_server, event_server] {
        if let Err(e) = task.await {
            warn!("Socket task ended abnormally: {}", e);
        }
    }

    info!("focuswm stopped");
    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
async fn wait_for_signal(shutdown: CancellationToken) {
    let mut terminate =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => Some(signal),
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                None
            }
        };

    let received = tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => "SIGINT",
            Err(e) => {
                warn!("Failed to listen for SIGINT: {}", e);
                return;
            }
        },
        Some(()) = async {
            match terminate.as_mut() {
                Some(signal) => signal.recv().await,
                None => std::future::pending().await,
            }
        } => "SIGTERM",
        () = shutdown.cancelled() => return,
    };

    info!("Received {}, shutting down", received);
    shutdown.cancel();
}
