//! [`MembershipStore`] over a pooled `SQLite` database.
//!
//! Queries are synchronous, so each call checks a connection out of the pool
//! on the blocking thread pool and runs the repository function there.

use std::path::Path;

use async_trait::async_trait;
use groupcast_core::{MembershipRow, MembershipStore, StoreError};
use rusqlite::Connection;
use tracing::{debug, info};

use crate::connection::{self, ConnectionConfig, ConnectionPool};
use crate::errors::Result;
use crate::migrations::run_migrations;
use crate::repository::MembershipRepo;

/// Durable membership store backed by `SQLite`.
#[derive(Clone)]
pub struct SqliteMembershipStore {
    pool: ConnectionPool,
}

impl SqliteMembershipStore {
    /// Wrap an existing pool, applying pending migrations first.
    pub fn open(pool: ConnectionPool) -> Result<Self> {
        let conn = pool.get()?;
        let applied = run_migrations(&conn)?;
        if applied > 0 {
            info!(applied, "membership schema migrated");
        }
        drop(conn);
        Ok(Self { pool })
    }

    /// Open a private in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::open(connection::new_in_memory(&ConnectionConfig::default())?)
    }

    /// Open (or create) the database file at `path`.
    pub fn file(path: &Path, config: &ConnectionConfig) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let path_str = path.to_string_lossy();
        debug!(path = %path_str, "opening membership database");
        Self::open(connection::new_file(&path_str, config)?)
    }

    /// Delete every row. Returns how many were removed.
    ///
    /// Connection ids are scoped to one server process, so rows found at
    /// startup belong to connections that no longer exist.
    pub fn purge(&self) -> Result<usize> {
        let conn = self.pool.get()?;
        let removed = MembershipRepo::delete_all(&conn)?;
        if removed > 0 {
            info!(removed, "purged stale memberships");
        }
        Ok(removed)
    }

    /// The underlying pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Number of stored rows.
    pub async fn count(&self) -> Result<i64> {
        self.with_conn(MembershipRepo::count).await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await?
    }
}

#[async_trait]
impl MembershipStore for SqliteMembershipStore {
    async fn put(&self, group_id: &str, connection_id: &str) -> std::result::Result<(), StoreError> {
        let group_id = group_id.to_owned();
        let connection_id = connection_id.to_owned();
        self.with_conn(move |conn| MembershipRepo::upsert(conn, &connection_id, &group_id))
            .await
            .map_err(StoreError::from)
    }

    async fn scan_all(&self) -> std::result::Result<Vec<MembershipRow>, StoreError> {
        self.with_conn(MembershipRepo::scan_all)
            .await
            .map_err(StoreError::from)
    }

    async fn delete(&self, connection_id: &str) -> std::result::Result<(), StoreError> {
        let connection_id = connection_id.to_owned();
        let _existed = self
            .with_conn(move |conn| MembershipRepo::delete(conn, &connection_id))
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn members_of(&self, group_id: &str) -> std::result::Result<Vec<String>, StoreError> {
        let group_id = group_id.to_owned();
        self.with_conn(move |conn| MembershipRepo::members_of(conn, &group_id))
            .await
            .map_err(StoreError::from)
    }
}
