//! Recording window-system backend for tests.

use super::{
    Atom, BackendError, ClientMessage, ClientProperties, ConfigureRequest, Rect, Timestamp,
    Window, WindowSystem,
};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

/// Window id the mock hands out as its placeholder.
pub const PLACEHOLDER: Window = 0xdead;

/// A request issued against the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    SetInputFocus(Window),
    SendClientMessage(ClientMessage),
    SetActiveWindow(Option<Window>),
    AddWmState(Window, String),
    RemoveWmState(Window, String),
    SetWithdrawn(Window),
    Map(Window),
    Unmap(Window),
    Raise(Window),
    Configure(ConfigureRequest),
    SelectClientEvents(Window),
    ChangeSaveSet(Window, bool),
    SetWorkarea(Rect),
}

type Observer = Box<dyn Fn(&Request) + Send + Sync>;

#[derive(Default)]
pub struct RecordingBackend {
    requests: Mutex<Vec<Request>>,
    atoms: Mutex<HashMap<String, Atom>>,
    failing_atoms: Mutex<HashSet<String>>,
    failing_requests: Mutex<Vec<Request>>,
    observer: Mutex<Option<Observer>>,
    properties: Mutex<HashMap<Window, ClientProperties>>,
    top_level: Mutex<Vec<Window>>,
    timestamp: AtomicU32,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// All requests issued so far.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.requests.lock().unwrap().clear();
    }

    /// Windows passed to `set_input_focus`, in order.
    pub fn focus_requests(&self) -> Vec<Window> {
        self.requests()
            .into_iter()
            .filter_map(|r| match r {
                Request::SetInputFocus(w) => Some(w),
                _ => None,
            })
            .collect()
    }

    /// Client messages sent, in order.
    pub fn messages(&self) -> Vec<ClientMessage> {
        self.requests()
            .into_iter()
            .filter_map(|r| match r {
                Request::SendClientMessage(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    /// The atom value the mock assigns to `name`.
    pub fn atom(&self, name: &str) -> Atom {
        let mut atoms = self.atoms.lock().unwrap();
        let next = 300 + u32::try_from(atoms.len()).unwrap();
        *atoms.entry(name.to_string()).or_insert(next)
    }

    /// Make interning `name` fail.
    pub fn fail_atom(&self, name: &str) {
        self.failing_atoms.lock().unwrap().insert(name.to_string());
    }

    /// Make every later occurrence of `request` fail after being recorded.
    pub fn fail_request(&self, request: Request) {
        self.failing_requests.lock().unwrap().push(request);
    }

    /// Run `observer` on every request as it is issued.
    pub fn observe(&self, observer: impl Fn(&Request) + Send + Sync + 'static) {
        *self.observer.lock().unwrap() = Some(Box::new(observer));
    }

    pub fn set_timestamp(&self, time: Timestamp) {
        self.timestamp.store(time, Ordering::Relaxed);
    }

    pub fn set_properties(&self, window: Window, properties: ClientProperties) {
        self.properties.lock().unwrap().insert(window, properties);
    }

    pub fn set_top_level(&self, windows: Vec<Window>) {
        *self.top_level.lock().unwrap() = windows;
    }

    fn record(&self, request: Request) -> Result<(), BackendError> {
        if let Some(observer) = self.observer.lock().unwrap().as_ref() {
            observer(&request);
        }
        let fails = self.failing_requests.lock().unwrap().contains(&request);
        self.requests.lock().unwrap().push(request);
        if fails {
            return Err(BackendError::Request("mock failure".to_string()));
        }
        Ok(())
    }
}

impl WindowSystem for RecordingBackend {
    fn placeholder(&self) -> Window {
        PLACEHOLDER
    }

    fn timestamp(&self) -> Timestamp {
        self.timestamp.load(Ordering::Relaxed)
    }

    fn intern_atom(&self, name: &str) -> Result<Atom, BackendError> {
        if self.failing_atoms.lock().unwrap().contains(name) {
            return Err(BackendError::Atom {
                name: name.to_string(),
                reason: "mock failure".to_string(),
            });
        }
        Ok(self.atom(name))
    }

    fn set_input_focus(&self, window: Window) -> Result<(), BackendError> {
        self.record(Request::SetInputFocus(window))
    }

    fn send_client_message(&self, message: ClientMessage) -> Result<(), BackendError> {
        self.record(Request::SendClientMessage(message))
    }

    fn set_active_window(&self, window: Option<Window>) -> Result<(), BackendError> {
        self.record(Request::SetActiveWindow(window))
    }

    fn add_wm_state(&self, window: Window, state: &str) -> Result<(), BackendError> {
        self.record(Request::AddWmState(window, state.to_string()))
    }

    fn remove_wm_state(&self, window: Window, state: &str) -> Result<(), BackendError> {
        self.record(Request::RemoveWmState(window, state.to_string()))
    }

    fn set_withdrawn(&self, window: Window) -> Result<(), BackendError> {
        self.record(Request::SetWithdrawn(window))
    }

    fn map(&self, window: Window) -> Result<(), BackendError> {
        self.record(Request::Map(window))
    }

    fn unmap(&self, window: Window) -> Result<(), BackendError> {
        self.record(Request::Unmap(window))
    }

    fn raise(&self, window: Window) -> Result<(), BackendError> {
        self.record(Request::Raise(window))
    }

    fn configure(&self, request: ConfigureRequest) -> Result<(), BackendError> {
        self.record(Request::Configure(request))
    }

    fn select_client_events(&self, window: Window) -> Result<(), BackendError> {
        self.record(Request::SelectClientEvents(window))
    }

    fn change_save_set(&self, window: Window, insert: bool) -> Result<(), BackendError> {
        self.record(Request::ChangeSaveSet(window, insert))
    }

    fn client_properties(&self, window: Window) -> Result<ClientProperties, BackendError> {
        self.properties
            .lock()
            .unwrap()
            .get(&window)
            .cloned()
            .ok_or_else(|| BackendError::Request(format!("BadWindow {window:#x}")))
    }

    fn set_workarea(&self, area: Rect, _desktops: usize) -> Result<(), BackendError> {
        self.record(Request::SetWorkarea(area))
    }

    fn screen_size(&self) -> (u32, u32) {
        (1920, 1080)
    }

    fn top_level_windows(&self) -> Result<Vec<Window>, BackendError> {
        Ok(self.top_level.lock().unwrap().clone())
    }
}
