//! Window-system backends.
//!
//! The focus core and the client lifecycle talk to the X server only through
//! the [`WindowSystem`] trait, so everything above this module can run
//! without a display.

#[cfg(test)]
pub(crate) mod mock;
pub mod x11;

use serde::Serialize;
use thiserror::Error;
pub use x11::X11Backend;
pub use x11rb::protocol::xproto::{Atom, StackMode, Timestamp, Window};

/// A format-32 client message addressed to a single window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientMessage {
    /// Destination window (also the event's `window` field).
    pub window: Window,

    /// Message type atom.
    pub type_: Atom,

    /// The five 32-bit data words.
    pub data: [u32; 5],
}

impl ClientMessage {
    /// Create a new client message.
    pub fn new(window: Window, type_: Atom, data: [u32; 5]) -> Self {
        Self {
            window,
            type_,
            data,
        }
    }
}

/// Screen space reserved by a client along each screen edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Strut {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

impl Strut {
    /// Build a strut from the first four cardinals of `_NET_WM_STRUT(_PARTIAL)`.
    ///
    /// Returns `None` when fewer than four values are present or all are zero.
    pub fn from_cardinals(values: &[u32]) -> Option<Self> {
        let [left, right, top, bottom, ..] = *values else {
            return None;
        };
        let strut = Self {
            left,
            right,
            top,
            bottom,
        };
        (strut != Self::default()).then_some(strut)
    }
}

/// An axis-aligned screen rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Properties read from a window when deciding whether and how to manage it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientProperties {
    /// `_NET_WM_NAME`, falling back to `WM_NAME`.
    pub name: String,

    /// `WM_CLASS` class part.
    pub class: String,

    /// `WM_CLASS` instance part.
    pub instance: String,

    /// ICCCM input hint. True when `WM_HINTS` is absent or has no input flag.
    pub accepts_input: bool,

    /// Whether `WM_TAKE_FOCUS` is listed in `WM_PROTOCOLS`.
    pub take_focus: bool,

    /// Urgency hint from `WM_HINTS`.
    pub urgent: bool,

    /// Reserved screen space, if any.
    pub strut: Option<Strut>,

    /// Override-redirect windows are never managed.
    pub override_redirect: bool,

    /// Whether the window is currently viewable.
    pub mapped: bool,
}

impl Default for ClientProperties {
    fn default() -> Self {
        Self {
            name: String::new(),
            class: String::new(),
            instance: String::new(),
            accepts_input: true,
            take_focus: false,
            urgent: false,
            strut: None,
            override_redirect: false,
            mapped: true,
        }
    }
}

/// A client's redirected `ConfigureWindow` request. Absent fields were not
/// part of the request and stay unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigureRequest {
    pub window: Window,
    pub x: Option<i32>,
    pub y: Option<i32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub border_width: Option<u32>,
    pub sibling: Option<Window>,
    pub stack_mode: Option<StackMode>,
}

impl ConfigureRequest {
    /// Whether the request puts the window on top of every sibling.
    pub fn raises(&self) -> bool {
        self.sibling.is_none() && self.stack_mode == Some(StackMode::ABOVE)
    }
}

/// Window-system events the window manager reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    /// A client asked to be mapped.
    MapRequest(Window),
    /// A window was unmapped.
    UnmapNotify(Window),
    /// A window was destroyed.
    DestroyNotify(Window),
    /// A window received input focus.
    FocusIn(Window),
    /// A window lost input focus.
    FocusOut(Window),
    /// A pager or client asked for a window to be activated (`_NET_ACTIVE_WINDOW`).
    ActivateRequest(Window),
    /// A window asked to move, resize or restack itself.
    ConfigureRequest(ConfigureRequest),
}

/// Errors returned by window-system requests.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("X11 connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Another window manager is already running")]
    AnotherWmRunning,

    #[error("X11 request failed: {0}")]
    Request(String),

    #[error("Failed to intern atom {name}: {reason}")]
    Atom { name: String, reason: String },
}

impl From<x11rb::errors::ConnectionError> for BackendError {
    fn from(e: x11rb::errors::ConnectionError) -> Self {
        Self::Request(e.to_string())
    }
}

impl From<x11rb::errors::ReplyError> for BackendError {
    fn from(e: x11rb::errors::ReplyError) -> Self {
        Self::Request(e.to_string())
    }
}

impl From<x11rb::errors::ReplyOrIdError> for BackendError {
    fn from(e: x11rb::errors::ReplyOrIdError) -> Self {
        Self::Request(e.to_string())
    }
}

/// The window-system requests issued by the window manager.
///
/// Requests are fire-and-forget from the caller's perspective: callers log
/// errors and carry on.
pub trait WindowSystem: Send + Sync {
    /// The off-screen window that holds focus when no client should.
    fn placeholder(&self) -> Window;

    /// The most recent server timestamp observed on the event stream.
    fn timestamp(&self) -> Timestamp;

    /// Resolve an atom by name.
    fn intern_atom(&self, name: &str) -> Result<Atom, BackendError>;

    /// Direct input focus to `window`.
    fn set_input_focus(&self, window: Window) -> Result<(), BackendError>;

    /// Send a client message to its destination window, without propagation.
    fn send_client_message(&self, message: ClientMessage) -> Result<(), BackendError>;

    /// Set (or clear, with `None`) the root `_NET_ACTIVE_WINDOW` property.
    fn set_active_window(&self, window: Option<Window>) -> Result<(), BackendError>;

    /// Add an atom to the window's `_NET_WM_STATE`.
    fn add_wm_state(&self, window: Window, state: &str) -> Result<(), BackendError>;

    /// Remove an atom from the window's `_NET_WM_STATE`.
    fn remove_wm_state(&self, window: Window, state: &str) -> Result<(), BackendError>;

    /// Set ICCCM `WM_STATE` to Withdrawn.
    fn set_withdrawn(&self, window: Window) -> Result<(), BackendError>;

    fn map(&self, window: Window) -> Result<(), BackendError>;

    fn unmap(&self, window: Window) -> Result<(), BackendError>;

    /// Raise a window to the top of the X stacking order.
    fn raise(&self, window: Window) -> Result<(), BackendError>;

    /// Apply a client's configure request as asked.
    fn configure(&self, request: ConfigureRequest) -> Result<(), BackendError>;

    /// Select focus and property events on a client window.
    fn select_client_events(&self, window: Window) -> Result<(), BackendError>;

    /// Insert into (or delete from) the save set.
    fn change_save_set(&self, window: Window, insert: bool) -> Result<(), BackendError>;

    /// Read the properties needed to manage a window.
    fn client_properties(&self, window: Window) -> Result<ClientProperties, BackendError>;

    /// Publish `_NET_WORKAREA` for every desktop.
    fn set_workarea(&self, area: Rect, desktops: usize) -> Result<(), BackendError>;

    /// Size of the root window.
    fn screen_size(&self) -> (u32, u32);

    /// Children of the root window, bottom to top.
    fn top_level_windows(&self) -> Result<Vec<Window>, BackendError>;
}
