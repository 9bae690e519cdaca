//! Workspaces and client visibility.
//!
//! Tracks which workspace each client lives on, which workspace is active and
//! which clients are iconified. Unmaps issued here are counted so that the
//! resulting `UnmapNotify` events are not mistaken for clients withdrawing.

use crate::backend::{Window, WindowSystem};
use crate::event::{Event, EventBus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Where a client lives and whether it is iconified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Workspace index, or `None` for sticky clients shown on every workspace.
    pub workspace: Option<usize>,
    pub iconified: bool,
}

impl Placement {
    fn visible_on(self, active: usize) -> bool {
        !self.iconified && self.workspace.is_none_or(|ws| ws == active)
    }
}

#[derive(Debug)]
struct DesktopState {
    names: Vec<String>,
    active: usize,
    placements: HashMap<Window, Placement>,
    /// Pending unmaps we issued ourselves, per window.
    unmap_ignore: HashMap<Window, u32>,
}

impl DesktopState {
    /// Count an unmap we are about to issue for `window`.
    fn expect_unmap(&mut self, window: Window) {
        *self.unmap_ignore.entry(window).or_default() += 1;
    }
}

/// Workspace membership and visibility.
pub struct Desktop {
    conn: Arc<dyn WindowSystem>,
    events: EventBus,
    state: Mutex<DesktopState>,
}

impl Desktop {
    /// Create a desktop with the given workspace names. The first is active.
    pub fn new(conn: Arc<dyn WindowSystem>, events: EventBus, names: Vec<String>) -> Self {
        let names = if names.is_empty() {
            vec!["1".to_string()]
        } else {
            names
        };
        Self {
            conn,
            events,
            state: Mutex::new(DesktopState {
                names,
                active: 0,
                placements: HashMap::new(),
                unmap_ignore: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DesktopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Index of the active workspace.
    pub fn active(&self) -> usize {
        self.lock().active
    }

    pub fn workspace_count(&self) -> usize {
        self.lock().names.len()
    }

    pub fn workspace_name(&self, index: usize) -> Option<String> {
        self.lock().names.get(index).cloned()
    }

    /// Index of the workspace called `name`.
    pub fn find_workspace(&self, name: &str) -> Option<usize> {
        self.lock().names.iter().position(|n| n == name)
    }

    /// Display name of the workspace holding `window` ("sticky" for sticky
    /// clients, empty if unknown).
    pub fn workspace_label(&self, window: Window) -> String {
        let state = self.lock();
        match state.placements.get(&window) {
            Some(Placement {
                workspace: Some(ws),
                ..
            }) => state.names.get(*ws).cloned().unwrap_or_default(),
            Some(Placement {
                workspace: None, ..
            }) => "sticky".to_string(),
            None => String::new(),
        }
    }

    pub fn placement(&self, window: Window) -> Option<Placement> {
        self.lock().placements.get(&window).copied()
    }

    /// Place a new client on `workspace` (`None` for sticky).
    pub fn assign(&self, window: Window, workspace: Option<usize>) {
        self.lock().placements.insert(
            window,
            Placement {
                workspace,
                iconified: false,
            },
        );
    }

    /// Forget a client.
    pub fn remove(&self, window: Window) {
        let mut state = self.lock();
        state.placements.remove(&window);
        state.unmap_ignore.remove(&window);
    }

    /// Whether a client is shown on the active workspace and not iconified.
    pub fn is_visible(&self, window: Window) -> bool {
        let state = self.lock();
        state
            .placements
            .get(&window)
            .is_some_and(|p| p.visible_on(state.active))
    }

    /// Consume one self-inflicted unmap for `window`, if any is pending.
    pub fn consume_unmap(&self, window: Window) -> bool {
        let mut state = self.lock();
        match state.unmap_ignore.get_mut(&window) {
            Some(count) if *count > 0 => {
                *count -= 1;
                true
            }
            _ => false,
        }
    }

    /// Make `index` the active workspace, hiding and showing clients.
    ///
    /// Does not move focus. Returns false if `index` is already active or
    /// out of range.
    pub fn activate(&self, index: usize) -> bool {
        let mut state = self.lock();
        if index == state.active || index >= state.names.len() {
            return false;
        }

        let previous = state.active;
        let hide: Vec<Window> = state
            .placements
            .iter()
            .filter(|(_, p)| p.workspace == Some(previous) && !p.iconified)
            .map(|(&w, _)| w)
            .collect();
        let show: Vec<Window> = state
            .placements
            .iter()
            .filter(|(_, p)| p.workspace == Some(index) && !p.iconified)
            .map(|(&w, _)| w)
            .collect();

        state.active = index;
        for &window in &hide {
            state.expect_unmap(window);
        }
        let name = state.names[index].clone();
        drop(state);

        for window in hide {
            self.hide(window);
        }
        for window in show {
            if let Err(e) = self.conn.map(window) {
                warn!("Failed to show {:#x}: {}", window, e);
            }
        }

        debug!("Switched to workspace {}", name);
        self.events.notify(Event::ChangedWorkspace { workspace: name });
        true
    }

    /// Iconify a client. Returns false if it is unknown or already iconified.
    pub fn iconify(&self, window: Window) -> bool {
        let mut state = self.lock();
        let active = state.active;
        let Some(placement) = state.placements.get_mut(&window) else {
            return false;
        };
        if placement.iconified {
            return false;
        }
        let was_visible = placement.visible_on(active);
        placement.iconified = true;
        if was_visible {
            state.expect_unmap(window);
        }
        drop(state);

        if was_visible {
            self.hide(window);
        }
        true
    }

    fn hide(&self, window: Window) {
        if let Err(e) = self.conn.unmap(window) {
            warn!("Failed to hide {:#x}: {}", window, e);
        }
    }

    /// Restore an iconified client, mapping it if its workspace is active.
    pub fn deiconify(&self, window: Window) {
        let mut state = self.lock();
        let active = state.active;
        let Some(placement) = state.placements.get_mut(&window) else {
            return;
        };
        if !placement.iconified {
            return;
        }
        placement.iconified = false;
        let visible = placement.visible_on(active);
        drop(state);

        if visible && let Err(e) = self.conn.map(window) {
            warn!("Failed to deiconify {:#x}: {}", window, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{RecordingBackend, Request};

    fn setup() -> (Arc<RecordingBackend>, Desktop, EventBus) {
        let backend = Arc::new(RecordingBackend::new());
        let events = EventBus::new(16);
        let names = ["1", "2", "3"].iter().map(ToString::to_string).collect();
        let desktop = Desktop::new(backend.clone(), events.clone(), names);
        (backend, desktop, events)
    }

    #[test]
    fn test_visibility() {
        let (_backend, desktop, _events) = setup();
        desktop.assign(1, Some(0));
        desktop.assign(2, Some(1));
        desktop.assign(3, None);

        assert!(desktop.is_visible(1));
        assert!(!desktop.is_visible(2));
        assert!(desktop.is_visible(3));
        assert!(!desktop.is_visible(99));
    }

    #[test]
    fn test_activate_hides_and_shows() {
        let (backend, desktop, events) = setup();
        let mut rx = events.subscribe();
        desktop.assign(1, Some(0));
        desktop.assign(2, Some(1));
        desktop.assign(3, None);

        assert!(desktop.activate(1));

        let requests = backend.requests();
        assert!(requests.contains(&Request::Unmap(1)));
        assert!(requests.contains(&Request::Map(2)));
        assert!(!requests.contains(&Request::Unmap(3)), "sticky stays mapped");
        assert_eq!(desktop.active(), 1);
        assert!(desktop.is_visible(2));
        assert!(!desktop.is_visible(1));
        assert_eq!(
            rx.try_recv().unwrap(),
            Event::ChangedWorkspace {
                workspace: "2".to_string()
            }
        );

        // Our own unmap is consumed exactly once
        assert!(desktop.consume_unmap(1));
        assert!(!desktop.consume_unmap(1));
    }

    #[test]
    fn test_requests_issued_outside_lock() {
        let (backend, desktop, _events) = setup();
        let desktop = Arc::new(desktop);
        let weak = Arc::downgrade(&desktop);
        backend.observe(move |_| {
            if let Some(desktop) = weak.upgrade() {
                assert!(desktop.state.try_lock().is_ok(), "desktop lock held");
            }
        });
        desktop.assign(1, Some(0));
        desktop.assign(2, Some(1));

        assert!(desktop.activate(1));
        assert!(desktop.iconify(2));
        desktop.deiconify(2);

        assert_eq!(
            backend.requests(),
            vec![
                Request::Unmap(1),
                Request::Map(2),
                Request::Unmap(2),
                Request::Map(2),
            ]
        );
        assert!(desktop.consume_unmap(1));
        assert!(desktop.consume_unmap(2));
    }

    #[test]
    fn test_activate_same_or_invalid() {
        let (backend, desktop, _events) = setup();
        assert!(!desktop.activate(0));
        assert!(!desktop.activate(7));
        assert!(backend.requests().is_empty());
    }

    #[test]
    fn test_iconify_and_deiconify() {
        let (backend, desktop, _events) = setup();
        desktop.assign(1, Some(0));

        assert!(desktop.iconify(1));
        assert!(!desktop.iconify(1));
        assert!(!desktop.is_visible(1));
        assert!(desktop.consume_unmap(1));

        desktop.deiconify(1);
        assert!(desktop.is_visible(1));
        assert_eq!(backend.requests(), vec![Request::Unmap(1), Request::Map(1)]);
    }

    #[test]
    fn test_workspace_label() {
        let (_backend, desktop, _events) = setup();
        desktop.assign(1, Some(2));
        desktop.assign(2, None);

        assert_eq!(desktop.workspace_label(1), "3");
        assert_eq!(desktop.workspace_label(2), "sticky");
        assert_eq!(desktop.workspace_label(3), "");
        assert_eq!(desktop.find_workspace("2"), Some(1));
    }
}
