//! X11 backend built on x11rb.
//!
//! Owns the connection, the placeholder window and the atom cache, translates
//! raw X events into [`WindowEvent`]s and records server timestamps seen on
//! the event stream.

use super::{
    Atom, BackendError, ClientMessage, ClientProperties, ConfigureRequest, Rect, Strut,
    Timestamp, Window, WindowEvent, WindowSystem,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};
use x11rb::connection::Connection;
use x11rb::errors::ReplyError;
use x11rb::protocol::Event;
use x11rb::protocol::xproto::{
    AtomEnum, ChangeWindowAttributesAux, ClientMessageEvent, ConfigureRequestEvent,
    ConfigureWindowAux,
    ConnectionExt as _, CreateWindowAux, EventMask, InputFocus, MapState, NotifyDetail,
    NotifyMode, PropMode, SetMode, StackMode, WindowClass,
};
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;

/// Name advertised through `_NET_SUPPORTING_WM_CHECK`.
const WM_NAME: &str = "focuswm";

/// ICCCM `WM_HINTS` flag bits.
const HINT_INPUT: u32 = 1;
const HINT_URGENCY: u32 = 1 << 8;

/// ICCCM `WM_STATE` value for withdrawn windows.
const WM_STATE_WITHDRAWN: u32 = 0;

/// Events selected on managed clients. Unmap and destroy already arrive
/// through the root's `SUBSTRUCTURE_NOTIFY`; `STRUCTURE_NOTIFY` here would
/// report every unmap twice.
fn client_event_mask() -> EventMask {
    EventMask::FOCUS_CHANGE | EventMask::PROPERTY_CHANGE
}

/// Upper bound, in 32-bit units, for property reads.
const PROPERTY_LENGTH: u32 = 1024;

x11rb::atom_manager! {
    /// Atoms the backend uses on every request.
    Atoms: AtomsCookie {
        WM_PROTOCOLS,
        WM_TAKE_FOCUS,
        WM_STATE,
        UTF8_STRING,
        _NET_SUPPORTED,
        _NET_SUPPORTING_WM_CHECK,
        _NET_ACTIVE_WINDOW,
        _NET_WM_NAME,
        _NET_WM_STATE,
        _NET_WM_STATE_FOCUSED,
        _NET_WM_STATE_DEMANDS_ATTENTION,
        _NET_WM_STRUT,
        _NET_WM_STRUT_PARTIAL,
        _NET_WORKAREA,
    }
}

/// X11 window-system backend.
pub struct X11Backend {
    conn: RustConnection,
    root: Window,
    width: u32,
    height: u32,
    placeholder: Window,
    atoms: Atoms,
    atom_cache: Mutex<HashMap<String, Atom>>,
    timestamp: AtomicU32,
}

impl X11Backend {
    /// Connect to the X server and take over window management on the root.
    ///
    /// Must be called once, before any other part of the window manager is
    /// constructed.
    pub fn connect(display: Option<&str>) -> Result<Self, BackendError> {
        let (conn, screen_num) =
            x11rb::connect(display).map_err(|e| BackendError::ConnectionFailed(e.to_string()))?;

        let screen = conn
            .setup()
            .roots
            .get(screen_num)
            .ok_or_else(|| BackendError::ConnectionFailed(format!("no screen {screen_num}")))?;
        let root = screen.root;
        let width = u32::from(screen.width_in_pixels);
        let height = u32::from(screen.height_in_pixels);

        info!("Connected to X11 screen {} ({}x{})", screen_num, width, height);

        let mask = EventMask::SUBSTRUCTURE_REDIRECT
            | EventMask::SUBSTRUCTURE_NOTIFY
            | EventMask::PROPERTY_CHANGE
            | EventMask::FOCUS_CHANGE;
        conn.change_window_attributes(root, &ChangeWindowAttributesAux::new().event_mask(mask))?
            .check()
            .map_err(|e| match e {
                ReplyError::X11Error(_) => BackendError::AnotherWmRunning,
                other => other.into(),
            })?;

        let atoms = Atoms::new(&conn)?.reply()?;

        let placeholder = conn.generate_id()?;
        conn.create_window(
            x11rb::COPY_DEPTH_FROM_PARENT,
            placeholder,
            root,
            -1000,
            -1000,
            1,
            1,
            0,
            WindowClass::INPUT_ONLY,
            x11rb::COPY_FROM_PARENT,
            &CreateWindowAux::new()
                .override_redirect(1)
                .event_mask(EventMask::PROPERTY_CHANGE),
        )?;
        conn.map_window(placeholder)?;

        conn.change_property32(
            PropMode::REPLACE,
            root,
            atoms._NET_SUPPORTING_WM_CHECK,
            AtomEnum::WINDOW,
            &[placeholder],
        )?;
        conn.change_property32(
            PropMode::REPLACE,
            placeholder,
            atoms._NET_SUPPORTING_WM_CHECK,
            AtomEnum::WINDOW,
            &[placeholder],
        )?;
        conn.change_property8(
            PropMode::REPLACE,
            placeholder,
            atoms._NET_WM_NAME,
            atoms.UTF8_STRING,
            WM_NAME.as_bytes(),
        )?;
        conn.change_property32(
            PropMode::REPLACE,
            root,
            atoms._NET_SUPPORTED,
            AtomEnum::ATOM,
            &[
                atoms._NET_ACTIVE_WINDOW,
                atoms._NET_WM_STATE,
                atoms._NET_WM_STATE_FOCUSED,
                atoms._NET_WM_STATE_DEMANDS_ATTENTION,
                atoms._NET_WM_STRUT,
                atoms._NET_WM_STRUT_PARTIAL,
                atoms._NET_WORKAREA,
                atoms._NET_SUPPORTING_WM_CHECK,
            ],
        )?;
        conn.flush()?;

        debug!("Placeholder window: {:#x}", placeholder);

        Ok(Self {
            conn,
            root,
            width,
            height,
            placeholder,
            atoms,
            atom_cache: Mutex::new(HashMap::new()),
            timestamp: AtomicU32::new(x11rb::CURRENT_TIME),
        })
    }

    /// Start the blocking event reader thread.
    ///
    /// Translated events are forwarded to the dispatch loop. A connection
    /// error cancels `shutdown`.
    pub fn spawn_event_reader(
        self: &Arc<Self>,
        tx: mpsc::Sender<WindowEvent>,
        shutdown: CancellationToken,
    ) -> std::io::Result<JoinHandle<()>> {
        let backend = Arc::clone(self);
        std::thread::Builder::new()
            .name("x11-events".to_string())
            .spawn(move || {
                loop {
                    match backend.conn.wait_for_event() {
                        Ok(event) => {
                            let Some(event) = backend.translate(event) else {
                                continue;
                            };
                            if tx.blocking_send(event).is_err() {
                                debug!("Dispatch loop gone, stopping event reader");
                                break;
                            }
                        }
                        Err(e) => {
                            error!("X11 connection lost: {}", e);
                            shutdown.cancel();
                            break;
                        }
                    }
                }
            })
    }

    /// Translate a raw X event, recording any timestamp it carries.
    pub fn translate(&self, event: Event) -> Option<WindowEvent> {
        match event {
            Event::MapRequest(e) => Some(WindowEvent::MapRequest(e.window)),
            Event::UnmapNotify(e) => Some(WindowEvent::UnmapNotify(e.window)),
            Event::DestroyNotify(e) => Some(WindowEvent::DestroyNotify(e.window)),
            Event::FocusIn(e) if !ignore_focus(e.mode, e.detail) => {
                Some(WindowEvent::FocusIn(e.event))
            }
            Event::FocusOut(e) if !ignore_focus(e.mode, e.detail) => {
                Some(WindowEvent::FocusOut(e.event))
            }
            Event::ConfigureRequest(e) => {
                Some(WindowEvent::ConfigureRequest(configure_request(&e)))
            }
            Event::ClientMessage(e) if e.type_ == self.atoms._NET_ACTIVE_WINDOW => {
                Some(WindowEvent::ActivateRequest(e.window))
            }
            Event::PropertyNotify(e) => {
                self.record_time(e.time);
                None
            }
            Event::KeyPress(e) => {
                self.record_time(e.time);
                None
            }
            Event::ButtonPress(e) => {
                self.record_time(e.time);
                None
            }
            Event::EnterNotify(e) => {
                self.record_time(e.time);
                None
            }
            Event::Error(e) => {
                debug!("X11 error: {:?}", e);
                None
            }
            other => {
                trace!("Ignoring X11 event: {:?}", other);
                None
            }
        }
    }

    fn record_time(&self, time: Timestamp) {
        if time != x11rb::CURRENT_TIME {
            self.timestamp.store(time, Ordering::Relaxed);
        }
    }

    /// Read a format-32 property, returning an empty list when absent.
    fn property32(
        &self,
        window: Window,
        property: Atom,
        type_: impl Into<Atom>,
    ) -> Result<Vec<u32>, BackendError> {
        let reply = self
            .conn
            .get_property(false, window, property, type_, 0, PROPERTY_LENGTH)?
            .reply()?;
        Ok(reply.value32().map(Iterator::collect).unwrap_or_default())
    }

    /// Read a format-8 property of any type.
    fn property8(&self, window: Window, property: Atom) -> Result<Vec<u8>, BackendError> {
        let reply = self
            .conn
            .get_property(false, window, property, AtomEnum::ANY, 0, PROPERTY_LENGTH)?
            .reply()?;
        Ok(reply.value8().map(Iterator::collect).unwrap_or_default())
    }

    fn window_name(&self, window: Window) -> Result<String, BackendError> {
        let name = self.property8(window, self.atoms._NET_WM_NAME)?;
        let name = if name.is_empty() {
            self.property8(window, AtomEnum::WM_NAME.into())?
        } else {
            name
        };
        Ok(String::from_utf8_lossy(&name).into_owned())
    }

    fn update_wm_state(
        &self,
        window: Window,
        state: &str,
        update: impl FnOnce(&mut Vec<Atom>, Atom),
    ) -> Result<(), BackendError> {
        let atom = self.intern_atom(state)?;
        let mut states = self.property32(window, self.atoms._NET_WM_STATE, AtomEnum::ATOM)?;
        update(&mut states, atom);
        self.conn.change_property32(
            PropMode::REPLACE,
            window,
            self.atoms._NET_WM_STATE,
            AtomEnum::ATOM,
            &states,
        )?;
        self.conn.flush()?;
        Ok(())
    }
}

/// Focus events caused by grabs or pointer/root transitions say nothing about
/// which client owns input.
fn ignore_focus(mode: NotifyMode, detail: NotifyDetail) -> bool {
    matches!(mode, NotifyMode::GRAB | NotifyMode::UNGRAB)
        || matches!(
            detail,
            NotifyDetail::POINTER | NotifyDetail::POINTER_ROOT | NotifyDetail::NONE
        )
}

/// Keep only the fields named in the request's value mask.
fn configure_request(e: &ConfigureRequestEvent) -> ConfigureRequest {
    let aux = ConfigureWindowAux::from_configure_request(e);
    ConfigureRequest {
        window: e.window,
        x: aux.x,
        y: aux.y,
        width: aux.width,
        height: aux.height,
        border_width: aux.border_width,
        sibling: aux.sibling,
        stack_mode: aux.stack_mode,
    }
}

fn configure_aux(request: &ConfigureRequest) -> ConfigureWindowAux {
    ConfigureWindowAux::new()
        .x(request.x)
        .y(request.y)
        .width(request.width)
        .height(request.height)
        .border_width(request.border_width)
        .sibling(request.sibling)
        .stack_mode(request.stack_mode)
}

/// Split `WM_CLASS` into (instance, class).
fn parse_wm_class(raw: &[u8]) -> (String, String) {
    let mut parts = raw
        .split(|&b| b == 0)
        .map(|p| String::from_utf8_lossy(p).into_owned());
    let instance = parts.next().unwrap_or_default();
    let class = parts.next().unwrap_or_default();
    (instance, class)
}

/// Interpret `WM_HINTS` as (accepts input, urgent).
fn parse_wm_hints(hints: &[u32]) -> (bool, bool) {
    let Some(&flags) = hints.first() else {
        return (true, false);
    };
    let accepts_input = if flags & HINT_INPUT == 0 {
        true
    } else {
        hints.get(1).is_some_and(|&input| input != 0)
    };
    (accepts_input, flags & HINT_URGENCY != 0)
}

impl WindowSystem for X11Backend {
    fn placeholder(&self) -> Window {
        self.placeholder
    }

    fn timestamp(&self) -> Timestamp {
        self.timestamp.load(Ordering::Relaxed)
    }

    fn intern_atom(&self, name: &str) -> Result<Atom, BackendError> {
        let mut cache = self
            .atom_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(&atom) = cache.get(name) {
            return Ok(atom);
        }

        let atom_error = |reason: String| BackendError::Atom {
            name: name.to_string(),
            reason,
        };
        let atom = self
            .conn
            .intern_atom(false, name.as_bytes())
            .map_err(|e| atom_error(e.to_string()))?
            .reply()
            .map_err(|e| atom_error(e.to_string()))?
            .atom;

        cache.insert(name.to_string(), atom);
        Ok(atom)
    }

    fn set_input_focus(&self, window: Window) -> Result<(), BackendError> {
        trace!("SetInputFocus {:#x}", window);
        self.conn
            .set_input_focus(InputFocus::POINTER_ROOT, window, x11rb::CURRENT_TIME)?;
        self.conn.flush()?;
        Ok(())
    }

    fn send_client_message(&self, message: ClientMessage) -> Result<(), BackendError> {
        let event = ClientMessageEvent::new(32, message.window, message.type_, message.data);
        self.conn
            .send_event(false, message.window, EventMask::NO_EVENT, event)?;
        self.conn.flush()?;
        Ok(())
    }

    fn set_active_window(&self, window: Option<Window>) -> Result<(), BackendError> {
        self.conn.change_property32(
            PropMode::REPLACE,
            self.root,
            self.atoms._NET_ACTIVE_WINDOW,
            AtomEnum::WINDOW,
            &[window.unwrap_or(x11rb::NONE)],
        )?;
        self.conn.flush()?;
        Ok(())
    }

    fn add_wm_state(&self, window: Window, state: &str) -> Result<(), BackendError> {
        self.update_wm_state(window, state, |states, atom| {
            if !states.contains(&atom) {
                states.push(atom);
            }
        })
    }

    fn remove_wm_state(&self, window: Window, state: &str) -> Result<(), BackendError> {
        self.update_wm_state(window, state, |states, atom| {
            states.retain(|&s| s != atom);
        })
    }

    fn set_withdrawn(&self, window: Window) -> Result<(), BackendError> {
        self.conn.change_property32(
            PropMode::REPLACE,
            window,
            self.atoms.WM_STATE,
            self.atoms.WM_STATE,
            &[WM_STATE_WITHDRAWN, x11rb::NONE],
        )?;
        self.conn.flush()?;
        Ok(())
    }

    fn map(&self, window: Window) -> Result<(), BackendError> {
        self.conn.map_window(window)?;
        self.conn.flush()?;
        Ok(())
    }

    fn unmap(&self, window: Window) -> Result<(), BackendError> {
        self.conn.unmap_window(window)?;
        self.conn.flush()?;
        Ok(())
    }

    fn raise(&self, window: Window) -> Result<(), BackendError> {
        self.conn.configure_window(
            window,
            &ConfigureWindowAux::new().stack_mode(StackMode::ABOVE),
        )?;
        self.conn.flush()?;
        Ok(())
    }

    fn configure(&self, request: ConfigureRequest) -> Result<(), BackendError> {
        trace!("ConfigureWindow {:?}", request);
        self.conn
            .configure_window(request.window, &configure_aux(&request))?;
        self.conn.flush()?;
        Ok(())
    }

    fn select_client_events(&self, window: Window) -> Result<(), BackendError> {
        self.conn.change_window_attributes(
            window,
            &ChangeWindowAttributesAux::new().event_mask(client_event_mask()),
        )?;
        self.conn.flush()?;
        Ok(())
    }

    fn change_save_set(&self, window: Window, insert: bool) -> Result<(), BackendError> {
        let mode = if insert {
            SetMode::INSERT
        } else {
            SetMode::DELETE
        };
        self.conn.change_save_set(mode, window)?.check()?;
        Ok(())
    }

    fn client_properties(&self, window: Window) -> Result<ClientProperties, BackendError> {
        let attrs = self.conn.get_window_attributes(window)?.reply()?;

        let name = self.window_name(window)?;
        let (instance, class) = parse_wm_class(&self.property8(window, AtomEnum::WM_CLASS.into())?);
        let (accepts_input, urgent) =
            parse_wm_hints(&self.property32(window, AtomEnum::WM_HINTS.into(), AtomEnum::WM_HINTS)?);
        let take_focus = self
            .property32(window, self.atoms.WM_PROTOCOLS, AtomEnum::ATOM)?
            .contains(&self.atoms.WM_TAKE_FOCUS);

        let partial =
            self.property32(window, self.atoms._NET_WM_STRUT_PARTIAL, AtomEnum::CARDINAL)?;
        let strut = match Strut::from_cardinals(&partial) {
            Some(strut) => Some(strut),
            None => Strut::from_cardinals(&self.property32(
                window,
                self.atoms._NET_WM_STRUT,
                AtomEnum::CARDINAL,
            )?),
        };

        Ok(ClientProperties {
            name,
            class,
            instance,
            accepts_input,
            take_focus,
            urgent,
            strut,
            override_redirect: attrs.override_redirect,
            mapped: attrs.map_state != MapState::UNMAPPED,
        })
    }

    fn set_workarea(&self, area: Rect, desktops: usize) -> Result<(), BackendError> {
        // Work areas never exceed the screen, which X bounds to 16 bits.
        let x = u32::try_from(area.x).unwrap_or_default();
        let y = u32::try_from(area.y).unwrap_or_default();
        let values: Vec<u32> = std::iter::repeat_n([x, y, area.width, area.height], desktops.max(1))
            .flatten()
            .collect();
        self.conn.change_property32(
            PropMode::REPLACE,
            self.root,
            self.atoms._NET_WORKAREA,
            AtomEnum::CARDINAL,
            &values,
        )?;
        self.conn.flush()?;
        Ok(())
    }

    fn screen_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn top_level_windows(&self) -> Result<Vec<Window>, BackendError> {
        Ok(self.conn.query_tree(self.root)?.reply()?.children)
    }
}
