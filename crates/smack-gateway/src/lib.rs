//! The fan-out hub: one registry of live websocket connections, a
//! coordinator task for register/unregister/broadcast-all, and per-socket
//! read/write loops.

pub mod connection;
pub mod hub;

pub use hub::{Client, Hub};
