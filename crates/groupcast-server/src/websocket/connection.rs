//! WebSocket client connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use groupcast_core::PushError;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;

/// Heartbeat bookkeeping shared between the reader and the writer task.
pub struct Liveness {
    is_alive: AtomicBool,
    last_seen: Mutex<Instant>,
}

impl Liveness {
    /// Fresh state: alive, seen now.
    pub fn new() -> Self {
        Self {
            is_alive: AtomicBool::new(true),
            last_seen: Mutex::new(Instant::now()),
        }
    }

    /// Record inbound activity.
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the last inbound activity.
    pub fn last_seen_elapsed(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Read and reset the alive flag for one heartbeat cycle.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// A connected WebSocket client, as seen by the send path.
///
/// This struct owns the only sender of the outbound queue. Once every clone
/// of the `Arc` is dropped, the writer drains the queue and closes.
pub struct ClientConnection {
    /// Server-assigned connection id.
    pub id: String,
    tx: mpsc::Sender<Bytes>,
    /// When this connection was established.
    pub connected_at: Instant,
    liveness: Arc<Liveness>,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection.
    pub fn new(id: String, tx: mpsc::Sender<Bytes>) -> Self {
        Self {
            id,
            tx,
            connected_at: Instant::now(),
            liveness: Arc::new(Liveness::new()),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue a frame for the client without waiting.
    ///
    /// A full queue is [`PushError::Backpressure`]; a closed one means the
    /// write task is gone and maps to [`PushError::Gone`].
    pub fn send(&self, frame: Bytes) -> Result<(), PushError> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                match err {
                    TrySendError::Full(_) => Err(PushError::Backpressure),
                    TrySendError::Closed(_) => Err(PushError::Gone),
                }
            }
        }
    }

    /// Queue a text frame.
    pub fn send_text(&self, text: String) -> Result<(), PushError> {
        self.send(Bytes::from(text))
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Heartbeat state, shareable with the writer task.
    pub fn liveness(&self) -> Arc<Liveness> {
        Arc::clone(&self.liveness)
    }

    /// Record inbound activity.
    pub fn mark_alive(&self) {
        self.liveness.mark_alive();
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn make_connection(capacity: usize) -> (ClientConnection, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ClientConnection::new("conn_1".into(), tx), rx)
    }

    #[test]
    fn create_connection() {
        let (conn, _rx) = make_connection(4);
        assert_eq!(conn.id, "conn_1");
        assert_eq!(conn.drop_count(), 0);
        assert!(conn.age() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn send_message_success() {
        let (conn, mut rx) = make_connection(4);
        conn.send_text("hello".into()).unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"hello"));
    }

    #[test]
    fn send_to_full_channel_is_backpressure() {
        let (conn, _rx) = make_connection(1);
        conn.send(Bytes::from_static(b"one")).unwrap();
        assert_matches!(conn.send(Bytes::from_static(b"two")), Err(PushError::Backpressure));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn send_to_closed_channel_is_gone() {
        let (conn, rx) = make_connection(1);
        drop(rx);
        assert_matches!(conn.send(Bytes::from_static(b"x")), Err(PushError::Gone));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn check_alive_resets_flag() {
        let (conn, _rx) = make_connection(1);
        let liveness = conn.liveness();
        assert!(liveness.check_alive());
        assert!(!liveness.check_alive());
        conn.mark_alive();
        assert!(liveness.check_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn mark_alive_refreshes_last_seen() {
        let liveness = Liveness::new();
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(liveness.last_seen_elapsed() >= Duration::from_millis(500));
        liveness.mark_alive();
        assert!(liveness.last_seen_elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn liveness_outlives_sender() {
        let (conn, rx) = make_connection(1);
        let liveness = conn.liveness();
        drop(conn);
        assert!(rx.is_closed());
        assert!(liveness.check_alive());
    }
}
