//! WebSocket client connection state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use prism_core::SessionId;

/// Represents a connected WebSocket client.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: String,
    /// Bound session ID (set after a successful `joinQueue`).
    session_id: Mutex<Option<SessionId>>,
    /// Send channel to the client's WebSocket write task.
    tx: mpsc::Sender<Arc<String>>,
    /// When the connection was accepted; liveness offsets are relative to it.
    opened_at: Instant,
    /// Millisecond offset from `opened_at` of the most recent inbound
    /// activity (any frame, including protocol pongs).
    last_seen_ms: AtomicU64,
    /// Count of messages dropped due to a full channel.
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    pub fn new(id: String, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id,
            session_id: Mutex::new(None),
            tx,
            opened_at: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Bind this connection to a session.
    pub fn bind_session(&self, session_id: SessionId) {
        *self.session_id.lock() = Some(session_id);
    }

    /// Get the currently bound session ID.
    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id.lock().clone()
    }

    /// Send a text message to the client.
    ///
    /// Returns `false` if the channel is full or closed, and increments the
    /// dropped message counter.
    pub fn send(&self, message: Arc<String>) -> bool {
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Serialize a JSON value and send it to the client.
    pub fn send_json(&self, value: &serde_json::Value) -> bool {
        match serde_json::to_string(value) {
            Ok(json) => self.send(Arc::new(json)),
            Err(_) => false,
        }
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record inbound activity, resetting the idle clock.
    pub fn touch(&self) {
        let offset = self.elapsed_ms();
        self.last_seen_ms.store(offset, Ordering::Relaxed);
    }

    /// How long the client has been silent.
    pub fn idle_for(&self) -> Duration {
        let idle = self
            .elapsed_ms()
            .saturating_sub(self.last_seen_ms.load(Ordering::Relaxed));
        Duration::from_millis(idle)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn elapsed_ms(&self) -> u64 {
        self.opened_at.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection() -> (ClientConnection, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(32);
        (ClientConnection::new("conn_1".into(), tx), rx)
    }

    #[test]
    fn create_connection() {
        let (conn, _rx) = make_connection();
        assert_eq!(conn.id, "conn_1");
        assert!(conn.session_id().is_none());
        assert_eq!(conn.drop_count(), 0);
    }

    #[tokio::test]
    async fn send_message_success() {
        let (conn, mut rx) = make_connection();
        assert!(conn.send(Arc::new("hello".into())));
        let msg = rx.recv().await.unwrap();
        assert_eq!(&*msg, "hello");
    }

    #[tokio::test]
    async fn send_to_closed_channel_returns_false() {
        let (tx, rx) = mpsc::channel(32);
        let conn = ClientConnection::new("conn_2".into(), tx);
        drop(rx);
        assert!(!conn.send(Arc::new("hello".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn send_to_full_channel_counts_drop() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = ClientConnection::new("conn_3".into(), tx);
        assert!(conn.send(Arc::new("msg1".into())));
        assert!(!conn.send(Arc::new("msg2".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn bind_and_rebind_session() {
        let (conn, _rx) = make_connection();
        conn.bind_session(SessionId::from("sess_1"));
        assert_eq!(conn.session_id(), Some(SessionId::from("sess_1")));
        conn.bind_session(SessionId::from("sess_2"));
        assert_eq!(conn.session_id(), Some(SessionId::from("sess_2")));
    }

    #[test]
    fn fresh_connection_is_not_idle() {
        let (conn, _rx) = make_connection();
        assert!(conn.idle_for() < Duration::from_millis(100));
    }

    #[test]
    fn idle_time_grows_while_silent() {
        let (conn, _rx) = make_connection();
        std::thread::sleep(Duration::from_millis(30));
        assert!(conn.idle_for() >= Duration::from_millis(20));
    }

    #[test]
    fn touch_resets_idle_time() {
        let (conn, _rx) = make_connection();
        std::thread::sleep(Duration::from_millis(30));
        conn.touch();
        assert!(conn.idle_for() < Duration::from_millis(20));
    }

    #[tokio::test]
    async fn send_json_serializes() {
        let (conn, mut rx) = make_connection();
        assert!(conn.send_json(&serde_json::json!({"key": "value"})));
        let msg = rx.recv().await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(parsed["key"], "value");
    }
}
