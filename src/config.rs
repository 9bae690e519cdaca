//! Configuration loading and defaults for focuswm.

use crate::hook::HookConfig;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory name used under the config and runtime directories.
const APP_DIR: &str = "focuswm";

/// Main configuration for focuswm.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Workspace names, in order. The first is active at startup.
    pub workspaces: Vec<String>,

    /// Whether newly mapped clients receive focus (default: true).
    pub focus_new_clients: bool,

    /// Command socket path.
    /// If unset, uses $XDG_RUNTIME_DIR/focuswm/command.sock.
    pub command_socket: Option<PathBuf>,

    /// Event socket path.
    /// If unset, uses $XDG_RUNTIME_DIR/focuswm/event.sock.
    pub event_socket: Option<PathBuf>,

    /// Maximum queued jobs waiting for the dispatch loop (default: 64).
    pub exec_queue_capacity: usize,

    /// Events buffered per event-socket subscriber (default: 256).
    pub event_queue_capacity: usize,

    /// Shell commands run at lifecycle points.
    pub hooks: HookConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspaces: (1..=4).map(|n| n.to_string()).collect(),
            focus_new_clients: true,
            command_socket: None,
            event_socket: None,
            exec_queue_capacity: 64,
            event_queue_capacity: 256,
            hooks: HookConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from the default path, or return defaults if not found.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            return Self::load(p);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let default_path = config_dir.join(APP_DIR).join("config.toml");
            if default_path.exists() {
                return Self::load(&default_path);
            }
        }

        Ok(Self::default())
    }

    fn validate(&self) -> Result<()> {
        if self.workspaces.is_empty() {
            bail!("At least one workspace is required");
        }
        if let Some(name) = self.workspaces.iter().find(|n| n.trim().is_empty()) {
            bail!("Workspace names must not be blank: {:?}", name);
        }
        if self.exec_queue_capacity == 0 || self.event_queue_capacity == 0 {
            bail!("Queue capacities must be at least 1");
        }
        Ok(())
    }

    /// Path of the command socket.
    pub fn command_socket_path(&self) -> PathBuf {
        self.command_socket
            .clone()
            .unwrap_or_else(|| runtime_dir().join("command.sock"))
    }

    /// Path of the event socket.
    pub fn event_socket_path(&self) -> PathBuf {
        self.event_socket
            .clone()
            .unwrap_or_else(|| runtime_dir().join("event.sock"))
    }
}

/// Per-user runtime directory for our sockets.
fn runtime_dir() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.workspaces, vec!["1", "2", "3", "4"]);
        assert!(config.focus_new_clients);
        assert_eq!(config.exec_queue_capacity, 64);
        assert_eq!(config.event_queue_capacity, 256);
        assert!(config.hooks.focused.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            workspaces = ["web", "code", "chat"]
            focus_new_clients = false
            command_socket = "/tmp/focuswm-test/cmd.sock"
            exec_queue_capacity = 8

            [hooks]
            focused = ["notify-send focused"]
            startup = ["xsetroot -solid black"]
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.workspaces, vec!["web", "code", "chat"]);
        assert!(!config.focus_new_clients);
        assert_eq!(
            config.command_socket_path(),
            PathBuf::from("/tmp/focuswm-test/cmd.sock")
        );
        assert_eq!(config.exec_queue_capacity, 8);
        assert_eq!(config.event_queue_capacity, 256);
        assert_eq!(config.hooks.focused, vec!["notify-send focused".to_string()]);
        assert_eq!(config.hooks.startup.len(), 1);
    }

    #[test]
    fn test_default_socket_paths() {
        let config = Config::default();
        let command = config.command_socket_path();
        let event = config.event_socket_path();

        assert!(command.ends_with("focuswm/command.sock"));
        assert!(event.ends_with("focuswm/event.sock"));
        assert_eq!(command.parent(), event.parent());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "workspaces = [\"a\", \"b\"]").unwrap();

        let config = Config::load_or_default(Some(file.path())).unwrap();
        assert_eq!(config.workspaces, vec!["a", "b"]);
        assert!(config.focus_new_clients);
    }

    #[test]
    fn test_load_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "workspaces = []").unwrap();
        assert!(Config::load(file.path()).is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "workspaces = [\"ok\", \"  \"]").unwrap();
        assert!(Config::load(file.path()).is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "focus_new_clients = \"yes\"").unwrap();
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(Config::load_or_default(Some(&missing)).is_err());
    }
}
