//! Membership store collaborator contract and an in-memory implementation.
//!
//! A membership row binds one connection to its current group. Rows are keyed
//! by connection id, so a `put` for an existing connection replaces its row.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;

/// Durable `(connection_id, group_id)` pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipRow {
    /// Transport-assigned connection id.
    pub connection_id: String,
    /// Group the connection currently belongs to.
    pub group_id: String,
}

impl MembershipRow {
    /// Create a row.
    pub fn new(connection_id: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            group_id: group_id.into(),
        }
    }
}

/// Durable storage of membership rows.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Insert or overwrite the row for `connection_id`.
    async fn put(&self, group_id: &str, connection_id: &str) -> Result<(), StoreError>;

    /// Every stored row, in no particular order.
    async fn scan_all(&self) -> Result<Vec<MembershipRow>, StoreError>;

    /// Delete the row for `connection_id`. Deleting a missing row succeeds.
    async fn delete(&self, connection_id: &str) -> Result<(), StoreError>;

    /// Connection ids whose row names `group_id`.
    ///
    /// The default filters a full scan, which is O(total rows). Backends with
    /// a secondary index on the group should override it.
    async fn members_of(&self, group_id: &str) -> Result<Vec<String>, StoreError> {
        let rows = self.scan_all().await?;
        Ok(rows
            .into_iter()
            .filter(|row| row.group_id == group_id)
            .map(|row| row.connection_id)
            .collect())
    }
}

/// Process-local store backed by a hash map. Nothing survives a restart.
#[derive(Default)]
pub struct InMemoryMembershipStore {
    rows: RwLock<HashMap<String, String>>,
}

impl InMemoryMembershipStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Whether the store holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Current group of a connection, if it has a row.
    pub fn group_of(&self, connection_id: &str) -> Option<String> {
        self.rows.read().get(connection_id).cloned()
    }
}

#[async_trait]
impl MembershipStore for InMemoryMembershipStore {
    async fn put(&self, group_id: &str, connection_id: &str) -> Result<(), StoreError> {
        let _ = self
            .rows
            .write()
            .insert(connection_id.to_owned(), group_id.to_owned());
        Ok(())
    }

    async fn scan_all(&self) -> Result<Vec<MembershipRow>, StoreError> {
        Ok(self
            .rows
            .read()
            .iter()
            .map(|(conn, group)| MembershipRow::new(conn.clone(), group.clone()))
            .collect())
    }

    async fn delete(&self, connection_id: &str) -> Result<(), StoreError> {
        let _ = self.rows.write().remove(connection_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_scan() {
        let store = InMemoryMembershipStore::new();
        store.put("a", "c1").await.unwrap();
        store.put("b", "c2").await.unwrap();

        let mut rows = store.scan_all().await.unwrap();
        rows.sort_by(|x, y| x.connection_id.cmp(&y.connection_id));
        assert_eq!(
            rows,
            vec![MembershipRow::new("c1", "a"), MembershipRow::new("c2", "b")]
        );
    }

    #[tokio::test]
    async fn put_overwrites_existing_row() {
        let store = InMemoryMembershipStore::new();
        store.put("a", "c1").await.unwrap();
        store.put("b", "c1").await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.group_of("c1").as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn delete_missing_row_is_ok() {
        let store = InMemoryMembershipStore::new();
        store.delete("nobody").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn default_members_of_filters_scan() {
        let store = InMemoryMembershipStore::new();
        store.put("a", "c1").await.unwrap();
        store.put("b", "c2").await.unwrap();
        store.put("a", "c3").await.unwrap();

        let mut members = store.members_of("a").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["c1".to_owned(), "c3".to_owned()]);
        assert!(store.members_of("zzz").await.unwrap().is_empty());
    }

    #[test]
    fn row_serializes_camel_case() {
        let row = MembershipRow::new("c1", "a");
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["connectionId"], "c1");
        assert_eq!(json["groupId"], "a");
    }
}
