//! Connection pusher collaborator contract.

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::PushError;

/// Delivers a payload to one live connection.
///
/// Implementations must not block indefinitely; the fanout engine still
/// bounds every attempt with its own timeout.
#[async_trait]
pub trait ConnectionPusher: Send + Sync {
    /// Push `payload` to `connection_id`.
    async fn push(&self, connection_id: &str, payload: Bytes) -> Result<(), PushError>;
}
