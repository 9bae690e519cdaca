//! User-configurable lifecycle hooks.
//!
//! Hooks are shell commands from the config file. Firing a hook only queues
//! it; the [`HookRunner`] task spawns the commands, so the dispatch loop
//! never waits on a child process.

use crate::backend::Window;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Environment variable carrying the window id to hook commands.
const WINDOW_ENV: &str = "FOCUSWM_WINDOW";
const HOOK_ENV: &str = "FOCUSWM_HOOK";

/// Lifecycle points a hook can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    Focused,
    Unfocused,
    Managed,
    Unmanaged,
    Startup,
}

impl Hook {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Focused => "focused",
            Self::Unfocused => "unfocused",
            Self::Managed => "managed",
            Self::Unmanaged => "unmanaged",
            Self::Startup => "startup",
        }
    }
}

/// Shell commands per hook, as written in the `[hooks]` config table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HookConfig {
    pub focused: Vec<String>,
    pub unfocused: Vec<String>,
    pub managed: Vec<String>,
    pub unmanaged: Vec<String>,
    pub startup: Vec<String>,
}

impl HookConfig {
    fn commands(&self, hook: Hook) -> &[String] {
        match hook {
            Hook::Focused => &self.focused,
            Hook::Unfocused => &self.unfocused,
            Hook::Managed => &self.managed,
            Hook::Unmanaged => &self.unmanaged,
            Hook::Startup => &self.startup,
        }
    }
}

/// A queued hook command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub hook: Hook,
    pub window: Window,
    pub command: String,
}

/// Handle used to fire hooks.
#[derive(Debug, Clone)]
pub struct Hooks {
    config: Arc<HookConfig>,
    tx: mpsc::UnboundedSender<Invocation>,
}

impl Hooks {
    /// Create a hook handle and the runner that executes its commands.
    pub fn new(config: HookConfig) -> (Self, HookRunner) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hooks = Self {
            config: Arc::new(config),
            tx,
        };
        (hooks, HookRunner { rx })
    }

    /// Queue every command configured for `hook`.
    ///
    /// `window` is 0 for hooks not tied to a client.
    pub fn fire(&self, hook: Hook, window: Window) {
        for command in self.config.commands(hook) {
            let invocation = Invocation {
                hook,
                window,
                command: command.clone(),
            };
            if self.tx.send(invocation).is_err() {
                warn!("Hook runner stopped, dropping {} hook", hook.as_str());
                return;
            }
        }
    }
}

/// Executes queued hook commands.
#[derive(Debug)]
pub struct HookRunner {
    rx: mpsc::UnboundedReceiver<Invocation>,
}

impl HookRunner {
    /// Run until every [`Hooks`] handle has been dropped.
    pub async fn run(mut self) {
        while let Some(invocation) = self.rx.recv().await {
            tokio::spawn(execute(invocation));
        }
        debug!("Hook runner stopped");
    }

    /// Next queued invocation, without running it.
    #[cfg(test)]
    pub(crate) fn try_next(&mut self) -> Option<Invocation> {
        self.rx.try_recv().ok()
    }
}

async fn execute(invocation: Invocation) {
    debug!(
        "Running {} hook: {}",
        invocation.hook.as_str(),
        invocation.command
    );

    let status = Command::new("sh")
        .arg("-c")
        .arg(&invocation.command)
        .env(WINDOW_ENV, invocation.window.to_string())
        .env(HOOK_ENV, invocation.hook.as_str())
        .stdin(Stdio::null())
        .status()
        .await;

    match status {
        Ok(status) if status.success() => {}
        Ok(status) => info!(
            "{} hook '{}' exited with {}",
            invocation.hook.as_str(),
            invocation.command,
            status
        ),
        Err(e) => warn!(
            "Failed to run {} hook '{}': {}",
            invocation.hook.as_str(),
            invocation.command,
            e
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fire_queues_configured_commands() {
        let config = HookConfig {
            focused: vec!["echo one".to_string(), "echo two".to_string()],
            ..Default::default()
        };
        let (hooks, mut runner) = Hooks::new(config);

        hooks.fire(Hook::Focused, 0x1234);

        let first = runner.try_next().unwrap();
        assert_eq!(first.hook, Hook::Focused);
        assert_eq!(first.window, 0x1234);
        assert_eq!(first.command, "echo one");
        assert_eq!(runner.try_next().unwrap().command, "echo two");
        assert!(runner.try_next().is_none());
    }

    #[test]
    fn test_fire_unconfigured_hook() {
        let (hooks, mut runner) = Hooks::new(HookConfig::default());
        hooks.fire(Hook::Unfocused, 1);
        assert!(runner.try_next().is_none());
    }

    #[test]
    fn test_fire_after_runner_dropped() {
        let config = HookConfig {
            startup: vec!["true".to_string()],
            ..Default::default()
        };
        let (hooks, runner) = Hooks::new(config);
        drop(runner);
        hooks.fire(Hook::Startup, 0);
    }

    #[tokio::test]
    async fn test_execute_exports_window_and_hook() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("hook.out");
        let invocation = Invocation {
            hook: Hook::Focused,
            window: 0x1234,
            command: format!(
                "echo \"$FOCUSWM_WINDOW $FOCUSWM_HOOK\" > '{}'",
                out.display()
            ),
        };

        execute(invocation).await;

        let written = std::fs::read_to_string(&out).unwrap();
        assert_eq!(written, "4660 focused\n");
    }

    #[tokio::test]
    async fn test_execute_failing_command() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("after.out");
        let invocation = Invocation {
            hook: Hook::Unmanaged,
            window: 0,
            command: format!("echo $FOCUSWM_WINDOW > '{}'; exit 3", out.display()),
        };

        execute(invocation).await;

        assert_eq!(std::fs::read_to_string(&out).unwrap(), "0\n");
    }

    #[test]
    fn test_parse_hook_table() {
        let config: HookConfig = toml::from_str(
            r#"
            focused = ["notify-send focused"]
            unmanaged = ["logger gone"]
        "#,
        )
        .unwrap();
        assert_eq!(config.focused, vec!["notify-send focused".to_string()]);
        assert!(config.unfocused.is_empty());
        assert_eq!(config.commands(Hook::Unmanaged).len(), 1);
    }
}
