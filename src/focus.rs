//! Focus stack and focus protocol engine.
//!
//! Keeps the recency-ordered history of managed clients and speaks the ICCCM
//! focus protocol: direct `SetInputFocus` for clients that accept input, and
//! the cooperative `WM_TAKE_FOCUS` message for clients that ask for it.

use crate::backend::{BackendError, ClientMessage, Window, WindowSystem};
use crate::client::Client;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace, warn};

const WM_PROTOCOLS: &str = "WM_PROTOCOLS";
const WM_TAKE_FOCUS: &str = "WM_TAKE_FOCUS";

/// Initial capacity for the stack and its membership index.
const INITIAL_CAPACITY: usize = 100;

/// The stack and its membership index. Always mutated together.
struct Stack<C: ?Sized> {
    /// Tail is the most recently focused client.
    clients: Vec<Arc<C>>,
    members: HashSet<Window>,
}

impl<C: Client + ?Sized> Stack<C> {
    /// Remove the first entry with `id`. Returns whether one was found.
    fn remove(&mut self, id: Window) -> bool {
        let Some(index) = self.clients.iter().position(|c| c.id() == id) else {
            return false;
        };
        self.clients.remove(index);
        self.members.remove(&id);
        true
    }

    fn push(&mut self, client: &Arc<C>) {
        self.clients.push(Arc::clone(client));
        self.members.insert(client.id());
    }
}

/// Focus history plus the requests that move input focus between clients.
///
/// The stack lock is held only for structural operations, never across a
/// window-system request or a client callback.
pub struct FocusManager<C: ?Sized> {
    conn: Arc<dyn WindowSystem>,
    stack: Mutex<Stack<C>>,
}

impl<C: Client + ?Sized> FocusManager<C> {
    /// Create an empty focus manager speaking through `conn`.
    pub fn new(conn: Arc<dyn WindowSystem>) -> Self {
        Self {
            conn,
            stack: Mutex::new(Stack {
                clients: Vec::with_capacity(INITIAL_CAPACITY),
                members: HashSet::with_capacity(INITIAL_CAPACITY),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Stack<C>> {
        self.stack.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the stack, least recently focused first.
    pub fn clients(&self) -> Vec<Arc<C>> {
        self.lock().clients.clone()
    }

    /// The focused client, if the stack tail agrees that it is active.
    pub fn current(&self) -> Option<Arc<C>> {
        let snapshot = self.clients();
        snapshot.last().filter(|c| c.is_active()).cloned()
    }

    /// Whether `id` is on the stack.
    pub fn is_tracked(&self, id: Window) -> bool {
        self.lock().members.contains(&id)
    }

    /// Enter a newly managed client at the bottom of the stack.
    ///
    /// Does not focus it. Ignored if the client is already tracked.
    pub fn initial_add(&self, client: &Arc<C>) {
        let mut stack = self.lock();
        if !stack.members.insert(client.id()) {
            debug!("Client {:#x} already on the focus stack", client.id());
            return;
        }
        stack.clients.insert(0, Arc::clone(client));
    }

    /// Remove a client from the stack. Removing an absent client is a no-op.
    pub fn remove(&self, client: &C) {
        self.lock().remove(client.id());
    }

    fn add(&self, client: &Arc<C>) {
        self.lock().push(client);
    }

    /// Move a client to the top of the stack without touching X focus.
    ///
    /// Used to reconcile the stack with focus changes observed from the
    /// server.
    pub fn set_focus(&self, client: &Arc<C>) {
        let mut stack = self.lock();
        stack.remove(client.id());
        stack.push(client);
    }

    /// Give input focus to `client`.
    ///
    /// Untracked clients are ignored. Clients that neither accept input nor
    /// take `WM_TAKE_FOCUS` are dropped from the stack and never focused.
    pub fn focus(&self, client: &Arc<C>) {
        let id = client.id();
        if !self.lock().remove(id) {
            trace!("Ignoring focus request for untracked client {:#x}", id);
            return;
        }

        let can_focus = client.can_focus();
        let notify = client.send_focus_notify();
        if can_focus || notify {
            self.add(client);
            client.prepare_for_focus();
        }

        if can_focus {
            debug!("Setting input focus to {:#x}", client.win());
            if let Err(e) = self.conn.set_input_focus(client.win()) {
                warn!("Could not set input focus to {:#x}: {}", client.win(), e);
            }
        }

        if notify && let Err(e) = self.send_take_focus(id) {
            warn!("Could not send WM_TAKE_FOCUS to {:#x}: {}", id, e);
        }
    }

    fn send_take_focus(&self, window: Window) -> Result<(), BackendError> {
        let protocols = self.conn.intern_atom(WM_PROTOCOLS)?;
        let take_focus = self.conn.intern_atom(WM_TAKE_FOCUS)?;
        let message = ClientMessage::new(
            window,
            protocols,
            [take_focus, self.conn.timestamp(), 0, 0, 0],
        );
        debug!("Sending WM_TAKE_FOCUS to {:#x}", window);
        self.conn.send_client_message(message)
    }

    /// Unfocus every client and park input focus on the placeholder window.
    pub fn root(&self) {
        for client in self.clients() {
            client.unfocused();
        }

        let placeholder = self.conn.placeholder();
        debug!("Focusing placeholder window {:#x}", placeholder);
        if let Err(e) = self.conn.set_input_focus(placeholder) {
            warn!("Could not focus placeholder window: {}", e);
        }
    }

    /// Most recently focused tracked client satisfying `eligible`.
    pub fn last_focused(&self, eligible: impl Fn(&C) -> bool) -> Option<Arc<C>> {
        let snapshot = self.clients();
        snapshot
            .into_iter()
            .rev()
            .find(|c| self.is_tracked(c.id()) && eligible(c.as_ref()))
    }

    /// Focus the most recent eligible client, or the placeholder if none.
    ///
    /// Call after any change that may have invalidated the focus target.
    pub fn fallback(&self, eligible: impl Fn(&C) -> bool) {
        match self.last_focused(eligible) {
            Some(client) => {
                debug!("Falling back to {:#x}", client.id());
                self.focus(&client);
            }
            None => {
                debug!("No focus candidate, focusing root");
                self.root();
            }
        }
    }

    /// Panics if the stack and its membership index disagree.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let stack = self.lock();
        let ids: HashSet<Window> = stack.clients.iter().map(|c| c.id()).collect();
        assert_eq!(ids.len(), stack.clients.len(), "duplicate stack entries");
        assert_eq!(ids, stack.members, "membership index out of sync");
    }
}
