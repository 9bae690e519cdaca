//! Window manager state.
//!
//! Owns the client registry, the stacking order and the focus stack, and
//! implements manage/unmanage and the reaction to window-system events. A
//! single [`Wm`] lives inside the dispatch loop; nothing else mutates it.

use crate::backend::{
    BackendError, ClientProperties, ConfigureRequest, Rect, StackMode, Strut, Window, WindowEvent,
};
use crate::client::Client;
use crate::event::Event;
use crate::focus::FocusManager;
use crate::hook::Hook;
use crate::xclient::{ClientEnv, FrameState, XClient};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Summary of a managed client, as reported over IPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientSummary {
    pub id: Window,
    pub name: String,
    pub class: String,
    pub instance: String,
    pub workspace: String,
    pub state: FrameState,
    pub iconified: bool,
    pub attention: bool,
}

/// Window manager state driven by the dispatch loop.
pub struct Wm {
    env: ClientEnv,
    focus: FocusManager<XClient>,
    clients: HashMap<Window, Arc<XClient>>,
    /// Bottom to top.
    stacking: Vec<Window>,
    focus_new_clients: bool,
}

impl Wm {
    pub fn new(env: ClientEnv, focus_new_clients: bool) -> Self {
        Self {
            focus: FocusManager::new(Arc::clone(&env.conn)),
            env,
            clients: HashMap::new(),
            stacking: Vec::new(),
            focus_new_clients,
        }
    }

    pub fn focus(&self) -> &FocusManager<XClient> {
        &self.focus
    }

    pub fn env(&self) -> &ClientEnv {
        &self.env
    }

    pub fn client(&self, window: Window) -> Option<&Arc<XClient>> {
        self.clients.get(&window)
    }

    /// Stacking order, bottom to top.
    pub fn stacking(&self) -> &[Window] {
        &self.stacking
    }

    /// The focused client, if any.
    pub fn active_client(&self) -> Option<Arc<XClient>> {
        self.focus.current()
    }

    /// Managed clients in focus order, least recent first.
    pub fn summaries(&self) -> Vec<ClientSummary> {
        let desktop = &self.env.desktop;
        self.focus
            .clients()
            .iter()
            .map(|c| ClientSummary {
                id: c.id(),
                name: c.name().to_string(),
                class: c.class().to_string(),
                instance: c.instance().to_string(),
                workspace: desktop.workspace_label(c.id()),
                state: c.frame_state(),
                iconified: desktop.placement(c.id()).is_some_and(|p| p.iconified),
                attention: c.demands_attention(),
            })
            .collect()
    }

    /// Start managing `window` if it is a manageable top-level window.
    pub fn manage(&mut self, window: Window) {
        if self.clients.contains_key(&window) || window == self.env.conn.placeholder() {
            return;
        }

        let props = match self.env.conn.client_properties(window) {
            Ok(props) => props,
            Err(e) => {
                warn!("Could not read properties of {:#x}: {}", window, e);
                return;
            }
        };
        let focus = self.focus_new_clients;
        self.adopt(window, props, focus);
    }

    /// Manage every mapped top-level window that existed before startup.
    pub fn manage_existing(&mut self) {
        let windows = match self.env.conn.top_level_windows() {
            Ok(windows) => windows,
            Err(e) => {
                warn!("Could not query existing windows: {}", e);
                return;
            }
        };

        for window in windows {
            if window == self.env.conn.placeholder() || self.clients.contains_key(&window) {
                continue;
            }
            let Ok(props) = self.env.conn.client_properties(window) else {
                continue;
            };
            if !props.mapped {
                continue;
            }
            info!("Managing existing client {:#x}", window);
            self.adopt(window, props, false);
        }
    }

    fn adopt(&mut self, window: Window, props: ClientProperties, focus: bool) {
        if props.override_redirect {
            trace!("Not managing override-redirect window {:#x}", window);
            return;
        }

        info!("Managing client {:#x} ({})", window, props.name);
        let urgent = props.urgent;
        let has_strut = props.strut.is_some();

        let conn = &self.env.conn;
        log_request("select events", window, conn.select_client_events(window));
        log_request("add to save set", window, conn.change_save_set(window, true));

        self.env
            .desktop
            .assign(window, Some(self.env.desktop.active()));
        let client = Arc::new(XClient::new(window, props, self.env.clone()));
        self.clients.insert(window, Arc::clone(&client));
        self.stacking.push(window);
        self.focus.initial_add(&client);
        log_request("map", window, self.env.conn.map(window));

        if urgent {
            client.attn_start();
        }
        if has_strut {
            self.apply_struts();
        }

        self.env.events.notify(Event::ManagedClient { id: window });
        self.env.hooks.fire(Hook::Managed, window);

        if focus {
            client.focus(&self.focus);
        }
    }

    /// Stop managing `window`. Unknown windows are ignored.
    pub fn unmanage(&mut self, window: Window) {
        let Some(client) = self.clients.get(&window).cloned() else {
            return;
        };

        info!("Unmanaging client {:#x} ({})", window, client.name());

        // Captured up front: the client is torn down below.
        let workspace = self.env.desktop.workspace_label(window);
        let name = client.name().to_string();
        let class = client.class().to_string();
        let instance = client.instance().to_string();

        let conn = Arc::clone(&self.env.conn);
        log_request("unmap", window, conn.unmap(window));
        log_request("withdraw", window, conn.set_withdrawn(window));
        self.focus.remove(&client);
        self.focus_fallback();
        self.stacking.retain(|&w| w != window);
        self.env.desktop.remove(window);
        self.clients.remove(&window);
        client.attn_stop();
        log_request(
            "remove from save set",
            window,
            conn.change_save_set(window, false),
        );

        if client.strut().is_some() {
            self.apply_struts();
        }

        self.env.events.notify(Event::UnmanagedClient {
            id: window,
            name,
            workspace,
            class,
            instance,
        });
        self.env.hooks.fire(Hook::Unmanaged, window);
    }

    /// Focus the most recent client visible on the active workspace, or the
    /// placeholder window if there is none.
    pub fn focus_fallback(&self) {
        let desktop = &self.env.desktop;
        self.focus.fallback(|c| desktop.is_visible(c.id()));
    }

    /// Raise and focus a managed client. Returns false if it is unknown.
    pub fn focus_window(&mut self, window: Window) -> bool {
        let Some(client) = self.clients.get(&window).cloned() else {
            return false;
        };
        self.raise(window);
        client.focus(&self.focus);
        true
    }

    /// Switch to workspace `index`, optionally moving focus onto it.
    pub fn set_workspace(&self, index: usize, fallback: bool) -> bool {
        if !self.env.desktop.activate(index) {
            return false;
        }
        if fallback {
            self.focus_fallback();
        }
        true
    }

    /// Iconify a managed client, moving focus away if it had it.
    pub fn iconify(&self, window: Window) -> bool {
        let Some(client) = self.clients.get(&window) else {
            return false;
        };
        let was_active = client.is_active();
        if !self.env.desktop.iconify(window) {
            return false;
        }
        if was_active {
            client.unfocused();
            self.focus_fallback();
        }
        true
    }

    /// Grant a client's configure request, tracking unconditional restacks.
    fn configure(&mut self, request: ConfigureRequest) {
        let window = request.window;
        log_request("configure", window, self.env.conn.configure(request));

        if !self.clients.contains_key(&window) || request.sibling.is_some() {
            return;
        }
        match request.stack_mode {
            Some(StackMode::ABOVE) => {
                self.stacking.retain(|&w| w != window);
                self.stacking.push(window);
            }
            Some(StackMode::BELOW) => {
                self.stacking.retain(|&w| w != window);
                self.stacking.insert(0, window);
            }
            _ => {}
        }
    }

    fn raise(&mut self, window: Window) {
        self.stacking.retain(|&w| w != window);
        self.stacking.push(window);
        log_request("raise", window, self.env.conn.raise(window));
    }

    /// Recompute the work area from the struts of every managed client.
    pub fn apply_struts(&self) {
        let reserved = self
            .clients
            .values()
            .filter_map(|c| c.strut())
            .fold(Strut::default(), |acc, s| Strut {
                left: acc.left.max(s.left),
                right: acc.right.max(s.right),
                top: acc.top.max(s.top),
                bottom: acc.bottom.max(s.bottom),
            });

        let (width, height) = self.env.conn.screen_size();
        let area = workarea(width, height, reserved);
        debug!("Work area: {:?}", area);
        if let Err(e) = self
            .env
            .conn
            .set_workarea(area, self.env.desktop.workspace_count())
        {
            warn!("Failed to set work area: {}", e);
        }
    }

    /// React to one window-system event.
    pub fn handle_event(&mut self, event: WindowEvent) {
        trace!("Handling {:?}", event);
        match event {
            WindowEvent::MapRequest(window) => {
                if self.clients.contains_key(&window) {
                    self.env.desktop.deiconify(window);
                } else {
                    self.manage(window);
                }
            }
            WindowEvent::UnmapNotify(window) => {
                if self.env.desktop.consume_unmap(window) {
                    trace!("Ignoring our own unmap of {:#x}", window);
                    return;
                }
                self.unmanage(window);
            }
            WindowEvent::DestroyNotify(window) => self.unmanage(window),
            WindowEvent::FocusIn(window) => {
                if let Some(client) = self.clients.get(&window) {
                    client.focused(&self.focus);
                }
            }
            WindowEvent::FocusOut(window) => {
                if let Some(client) = self.clients.get(&window) {
                    client.unfocused();
                }
            }
            WindowEvent::ActivateRequest(window) => {
                if !self.focus_window(window) {
                    debug!("Activation request for unmanaged window {:#x}", window);
                }
            }
            WindowEvent::ConfigureRequest(request) => self.configure(request),
        }
    }
}

fn log_request(what: &str, window: Window, result: Result<(), BackendError>) {
    if let Err(e) = result {
        warn!("Failed to {} {:#x}: {}", what, window, e);
    }
}

/// Screen rectangle left over after reserving `strut`.
fn workarea(width: u32, height: u32, strut: Strut) -> Rect {
    let left = strut.left.min(width);
    let right = strut.right.min(width - left);
    let top = strut.top.min(height);
    let bottom = strut.bottom.min(height - top);
    Rect {
        x: i32::try_from(left).unwrap_or(i32::MAX),
        y: i32::try_from(top).unwrap_or(i32::MAX),
        width: width - left - right,
        height: height - top - bottom,
    }
}
