//! Settings type definitions.
//!
//! Every section uses `#[serde(rename_all = "camelCase", default)]`, so a
//! settings file only needs the keys it changes.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings for the broker process.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "store": { "backend": "memory" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroupcastSettings {
    /// Listener and per-connection limits.
    pub server: ServerSettings,
    /// Broadcast delivery tuning.
    pub fanout: FanoutSettings,
    /// Membership store selection.
    pub store: StoreSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl GroupcastSettings {
    /// Reject values that parse but cannot run.
    pub fn validate(&self) -> Result<()> {
        let s = &self.server;
        if s.max_connections == 0 {
            return Err(invalid("server.maxConnections must be at least 1"));
        }
        if s.outbound_buffer == 0 {
            return Err(invalid("server.outboundBuffer must be at least 1"));
        }
        if s.max_message_size == 0 {
            return Err(invalid("server.maxMessageSize must be at least 1"));
        }
        if s.heartbeat_interval_ms == 0 {
            return Err(invalid("server.heartbeatIntervalMs must be at least 1"));
        }
        if s.heartbeat_timeout_ms < s.heartbeat_interval_ms {
            return Err(invalid(
                "server.heartbeatTimeoutMs must not be shorter than heartbeatIntervalMs",
            ));
        }
        if self.fanout.push_timeout_ms == 0 {
            return Err(invalid("fanout.pushTimeoutMs must be at least 1"));
        }
        if self.store.pool_size == 0 {
            return Err(invalid("store.poolSize must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> SettingsError {
    SettingsError::InvalidValue(message.to_owned())
}

/// Listener and connection settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port. `0` picks a free port.
    pub port: u16,
    /// Connections accepted before new upgrades are refused.
    pub max_connections: usize,
    /// Ping interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// A connection silent for this long is dropped.
    pub heartbeat_timeout_ms: u64,
    /// Largest inbound frame in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound queue depth.
    pub outbound_buffer: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_connections: 1000,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 60_000,
            max_message_size: 128 * 1024,
            outbound_buffer: 256,
        }
    }
}

/// Broadcast delivery settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FanoutSettings {
    /// Upper bound on a single push attempt, in milliseconds.
    pub push_timeout_ms: u64,
}

impl Default for FanoutSettings {
    fn default() -> Self {
        Self {
            push_timeout_ms: 5_000,
        }
    }
}

/// Which membership store backs the registry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// File-backed `SQLite`.
    #[default]
    Sqlite,
    /// Process-local map; memberships vanish on restart.
    Memory,
}

impl StoreBackend {
    /// Parse a backend name, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "sqlite" => Some(Self::Sqlite),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

/// Membership store settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Store implementation.
    pub backend: StoreBackend,
    /// Database file. A leading `~/` expands to `$HOME`.
    pub path: String,
    /// Maximum pooled `SQLite` connections.
    pub pool_size: u32,
    /// `SQLite` busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: "~/.groupcast/memberships.db".to_string(),
            pool_size: 8,
            busy_timeout_ms: 5_000,
        }
    }
}

impl StoreSettings {
    /// `path` with a leading `~/` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        expand_home(&self.path)
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

pub(crate) fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None => PathBuf::from(path),
    }
}
