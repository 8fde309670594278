//! Connection-to-group registry over a [`MembershipStore`].
//!
//! The registry holds no membership state of its own. Every lookup reads the
//! store, and every mutation is a single-row upsert or delete keyed by
//! connection id, so concurrent callers need no coordination here.

use std::sync::Arc;

use tracing::{debug, error};

use crate::errors::BrokerError;
use crate::store::MembershipStore;

/// Membership mutations and lookups.
#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn MembershipStore>,
}

impl Registry {
    /// Create a registry over a shared store handle.
    pub fn new(store: Arc<dyn MembershipStore>) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn MembershipStore> {
        &self.store
    }

    /// Bind `connection_id` to `group_id`, replacing any previous group.
    pub async fn upsert(&self, connection_id: &str, group_id: &str) -> Result<(), BrokerError> {
        self.store
            .put(group_id, connection_id)
            .await
            .map_err(|source| {
                error!(connection_id, group_id, error = %source, "membership upsert failed");
                BrokerError::StoreWriteFailed { source }
            })?;
        debug!(connection_id, group_id, "membership upserted");
        Ok(())
    }

    /// Remove the membership row for `connection_id`, if any.
    pub async fn remove(&self, connection_id: &str) -> Result<(), BrokerError> {
        self.store.delete(connection_id).await.map_err(|source| {
            error!(connection_id, error = %source, "membership delete failed");
            BrokerError::StoreWriteFailed { source }
        })?;
        debug!(connection_id, "membership removed");
        Ok(())
    }

    /// Connection ids currently in `group_id`. Empty for unknown groups.
    pub async fn members_of(&self, group_id: &str) -> Result<Vec<String>, BrokerError> {
        let members = self.store.members_of(group_id).await.map_err(|source| {
            error!(group_id, error = %source, "membership lookup failed");
            BrokerError::StoreReadFailed { source }
        })?;
        debug!(group_id, members = members.len(), "resolved group members");
        Ok(members)
    }
}
