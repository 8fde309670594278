//! Scriptable collaborators for tests in this and downstream crates.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::errors::{PushError, StoreError};
use crate::pusher::ConnectionPusher;
use crate::store::{InMemoryMembershipStore, MembershipRow, MembershipStore};

/// In-memory store that can be told to fail reads, writes, or both.
pub struct FailingStore {
    inner: InMemoryMembershipStore,
    fail_writes: bool,
    fail_reads: bool,
    put_calls: AtomicUsize,
}

impl FailingStore {
    fn with(fail_writes: bool, fail_reads: bool) -> Self {
        Self {
            inner: InMemoryMembershipStore::new(),
            fail_writes,
            fail_reads,
            put_calls: AtomicUsize::new(0),
        }
    }

    /// Every call fails.
    pub fn all() -> Self {
        Self::with(true, true)
    }

    /// `put` and `delete` fail, reads succeed.
    pub fn writes() -> Self {
        Self::with(true, false)
    }

    /// `scan_all` and `members_of` fail, writes succeed.
    pub fn reads() -> Self {
        Self::with(false, true)
    }

    /// Number of `put` calls received, including failed ones.
    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    /// Rows that were actually written.
    pub fn inner(&self) -> &InMemoryMembershipStore {
        &self.inner
    }
}

#[async_trait]
impl MembershipStore for FailingStore {
    async fn put(&self, group_id: &str, connection_id: &str) -> Result<(), StoreError> {
        let _ = self.put_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes {
            return Err(StoreError::Backend("scripted write failure".into()));
        }
        self.inner.put(group_id, connection_id).await
    }

    async fn scan_all(&self) -> Result<Vec<MembershipRow>, StoreError> {
        if self.fail_reads {
            return Err(StoreError::Unavailable("scripted read failure".into()));
        }
        self.inner.scan_all().await
    }

    async fn delete(&self, connection_id: &str) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::Backend("scripted write failure".into()));
        }
        self.inner.delete(connection_id).await
    }
}

/// Pusher that records every attempt and fails or stalls chosen recipients.
#[derive(Default)]
pub struct ScriptedPusher {
    failing: HashSet<String>,
    delays: HashMap<String, Duration>,
    attempts: Mutex<Vec<(String, Bytes)>>,
}

impl ScriptedPusher {
    /// A pusher that delivers to everyone immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make pushes to `connection_id` fail.
    #[must_use]
    pub fn fail_for(mut self, connection_id: &str) -> Self {
        let _ = self.failing.insert(connection_id.to_owned());
        self
    }

    /// Delay pushes to `connection_id` by `delay` before resolving.
    #[must_use]
    pub fn delay_for(mut self, connection_id: &str, delay: Duration) -> Self {
        let _ = self.delays.insert(connection_id.to_owned(), delay);
        self
    }

    /// How many attempts targeted `connection_id`.
    pub fn attempts_for(&self, connection_id: &str) -> usize {
        self.attempts
            .lock()
            .iter()
            .filter(|(id, _)| id == connection_id)
            .count()
    }

    /// Total attempts across all recipients.
    pub fn total_attempts(&self) -> usize {
        self.attempts.lock().len()
    }

    /// Payloads pushed to `connection_id`, in attempt order.
    pub fn payloads_for(&self, connection_id: &str) -> Vec<Bytes> {
        self.attempts
            .lock()
            .iter()
            .filter(|(id, _)| id == connection_id)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

#[async_trait]
impl ConnectionPusher for ScriptedPusher {
    async fn push(&self, connection_id: &str, payload: Bytes) -> Result<(), PushError> {
        self.attempts.lock().push((connection_id.to_owned(), payload));
        if let Some(delay) = self.delays.get(connection_id) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(connection_id) {
            return Err(PushError::Transport("scripted push failure".into()));
        }
        Ok(())
    }
}
