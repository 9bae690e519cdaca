//! focuswm - a small X11 window manager built around a serialized
//! input-focus core.
//!
//! The focus stack and protocol engine live in [`focus`]; [`xclient`] and
//! [`wm`] tie them to managed windows, and [`dispatch`] serializes every
//! mutation of window manager state onto one loop.

pub mod backend;
pub mod client;
pub mod config;
pub mod desktop;
pub mod dispatch;
pub mod event;
pub mod focus;
pub mod hook;
pub mod ipc;
pub mod wm;
pub mod xclient;
