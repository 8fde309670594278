//! Live connection table and the push side of the transport.
//!
//! The table maps connection ids to open sockets and implements
//! [`ConnectionPusher`], so the fanout engine reaches clients through it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use groupcast_core::{ConnectionPusher, PushError};
use tokio::sync::RwLock;
use tracing::debug;

use super::connection::ClientConnection;

/// Open WebSocket connections indexed by connection id.
pub struct ConnectionTable {
    connections: RwLock<HashMap<String, Arc<ClientConnection>>>,
}

impl ConnectionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Add a connection.
    pub async fn add(&self, connection: Arc<ClientConnection>) {
        let mut conns = self.connections.write().await;
        let _ = conns.insert(connection.id.clone(), connection);
    }

    /// Remove a connection by id.
    pub async fn remove(&self, connection_id: &str) {
        let mut conns = self.connections.write().await;
        let _ = conns.remove(connection_id);
    }

    /// Look up a connection.
    pub async fn get(&self, connection_id: &str) -> Option<Arc<ClientConnection>> {
        self.connections.read().await.get(connection_id).cloned()
    }

    /// Number of open connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionPusher for ConnectionTable {
    async fn push(&self, connection_id: &str, payload: Bytes) -> Result<(), PushError> {
        let Some(conn) = self.get(connection_id).await else {
            debug!(connection_id, "push to unknown connection");
            return Err(PushError::Gone);
        };
        conn.send(payload)
    }
}
