//! Managed X clients.
//!
//! [`XClient`] is the concrete [`Client`] the window manager tracks. It owns
//! the focused/unfocused lifecycle: visual state, EWMH properties,
//! notifications and hooks.

use crate::backend::{BackendError, ClientProperties, Strut, Window, WindowSystem};
use crate::client::Client;
use crate::desktop::Desktop;
use crate::event::{Event, EventBus};
use crate::focus::FocusManager;
use crate::hook::{Hook, Hooks};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

const NET_WM_STATE_FOCUSED: &str = "_NET_WM_STATE_FOCUSED";
const NET_WM_STATE_DEMANDS_ATTENTION: &str = "_NET_WM_STATE_DEMANDS_ATTENTION";

/// Visual state of a client's frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameState {
    Active,
    #[default]
    Inactive,
}

#[derive(Debug, Default)]
struct ClientState {
    frame: FrameState,
    attention: bool,
}

/// Collaborators shared by every managed client.
#[derive(Clone)]
pub struct ClientEnv {
    pub conn: Arc<dyn WindowSystem>,
    pub desktop: Arc<Desktop>,
    pub events: EventBus,
    pub hooks: Hooks,
}

/// A managed top-level window.
pub struct XClient {
    id: Window,
    props: ClientProperties,
    state: Mutex<ClientState>,
    env: ClientEnv,
}

impl XClient {
    /// Wrap a window whose properties have already been read.
    pub fn new(id: Window, props: ClientProperties, env: ClientEnv) -> Self {
        Self {
            id,
            props,
            state: Mutex::new(ClientState::default()),
            env,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.props.name
    }

    pub fn class(&self) -> &str {
        &self.props.class
    }

    pub fn instance(&self) -> &str {
        &self.props.instance
    }

    pub fn strut(&self) -> Option<Strut> {
        self.props.strut
    }

    pub fn frame_state(&self) -> FrameState {
        self.lock().frame
    }

    pub fn demands_attention(&self) -> bool {
        self.lock().attention
    }

    /// Mark the client as wanting attention.
    pub fn attn_start(&self) {
        let started = !std::mem::replace(&mut self.lock().attention, true);
        if started {
            self.log_request(
                "add attention state",
                self.env
                    .conn
                    .add_wm_state(self.id, NET_WM_STATE_DEMANDS_ATTENTION),
            );
        }
    }

    /// Stop any attention signalling.
    pub fn attn_stop(&self) {
        let stopped = std::mem::take(&mut self.lock().attention);
        if stopped {
            self.log_request(
                "remove attention state",
                self.env
                    .conn
                    .remove_wm_state(self.id, NET_WM_STATE_DEMANDS_ATTENTION),
            );
        }
    }

    /// Focus this client through the focus stack.
    pub fn focus(self: &Arc<Self>, focus: &FocusManager<Self>) {
        self.attn_stop();
        focus.focus(self);
    }

    /// Record that this client received input focus.
    pub fn focused(self: &Arc<Self>, focus: &FocusManager<Self>) {
        self.attn_stop();
        self.lock().frame = FrameState::Active;
        focus.set_focus(self);
        self.log_request(
            "set active window",
            self.env.conn.set_active_window(Some(self.id)),
        );
        self.log_request(
            "add focused state",
            self.env.conn.add_wm_state(self.id, NET_WM_STATE_FOCUSED),
        );

        debug!("Client {:#x} focused", self.id);
        self.env.events.notify(Event::FocusedClient { id: self.id });
        self.env
            .events
            .notify(Event::ChangedActiveClient { id: self.id });
        self.env.hooks.fire(Hook::Focused, self.id);
    }

    fn log_request(&self, what: &str, result: Result<(), BackendError>) {
        if let Err(e) = result {
            warn!("Failed to {} for {:#x}: {}", what, self.id, e);
        }
    }
}

impl Client for XClient {
    fn id(&self) -> Window {
        self.id
    }

    fn is_active(&self) -> bool {
        self.lock().frame == FrameState::Active
    }

    fn can_focus(&self) -> bool {
        self.props.accepts_input
    }

    fn send_focus_notify(&self) -> bool {
        self.props.take_focus
    }

    fn prepare_for_focus(&self) {
        let Some(placement) = self.env.desktop.placement(self.id) else {
            return;
        };

        // The workspace must be active before iconification can be undone.
        if let Some(workspace) = placement.workspace
            && workspace != self.env.desktop.active()
        {
            self.env.desktop.activate(workspace);
        }
        if placement.iconified {
            self.env.desktop.deiconify(self.id);
        }
    }

    fn unfocused(&self) {
        let was_focused =
            std::mem::replace(&mut self.lock().frame, FrameState::Inactive) == FrameState::Active;

        self.log_request("clear active window", self.env.conn.set_active_window(None));
        self.log_request(
            "remove focused state",
            self.env.conn.remove_wm_state(self.id, NET_WM_STATE_FOCUSED),
        );

        if was_focused {
            debug!("Client {:#x} unfocused", self.id);
            self.env
                .events
                .notify(Event::UnfocusedClient { id: self.id });
            self.env.events.notify(Event::ChangedActiveClient { id: 0 });
            self.env.hooks.fire(Hook::Unfocused, self.id);
        }
    }
}
