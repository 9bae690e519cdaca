//! Client capability interface consumed by the focus core.

use crate::backend::Window;

/// A manageable top-level window, as seen by the focus stack.
///
/// `can_focus` and `send_focus_notify` are independent: a client may accept
/// direct input focus, ask for `WM_TAKE_FOCUS`, both, or neither. Clients
/// doing neither never receive focus.
pub trait Client: Send + Sync {
    /// Unique window identifier, stable for the client's lifetime.
    fn id(&self) -> Window;

    /// Window that direct input focus is set on.
    fn win(&self) -> Window {
        self.id()
    }

    /// Whether the client currently believes it is the active one.
    fn is_active(&self) -> bool;

    /// Whether the client accepts `SetInputFocus`.
    fn can_focus(&self) -> bool;

    /// Whether the client wants a `WM_TAKE_FOCUS` message.
    fn send_focus_notify(&self) -> bool;

    /// Make the client visible (workspace, iconification) before a focus grant.
    fn prepare_for_focus(&self);

    /// Tell the client it no longer has focus.
    fn unfocused(&self);
}
