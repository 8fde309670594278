//! WebSocket transport: connection state, the live connection table, and the
//! per-connection session task.

pub mod connection;
pub mod session;
pub mod table;
