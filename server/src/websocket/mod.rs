//! WebSocket support for live collection watches.
//!
//! Clients connect once, then send `watch`/`unwatch` messages naming
//! collection paths. Every committed mutation on a watched path is followed by
//! a full snapshot pushed to each watcher.

mod manager;

pub use beaver_sync::wire::{ClientMessage, ServerMessage};
pub use manager::ConnectionManager;
