//! # groupcast-server
//!
//! Axum HTTP + WebSocket transport for the groupcast broker.
//!
//! - `GET /ws[?groupId=…]`: upgrade; each socket gets a UUID v7 connection id
//!   and runs a session that exchanges JSON frames with the broker
//! - `GET /health`: liveness, uptime, and open connection count
//! - `GET /metrics`: Prometheus text exposition
//!
//! The [`websocket::table::ConnectionTable`] doubles as the broker's
//! connection pusher, so broadcasts land in each socket's outbound queue.

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use server::GroupcastServer;
pub use shutdown::ShutdownCoordinator;
pub use websocket::table::ConnectionTable;
