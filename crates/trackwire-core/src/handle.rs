//! Connection handles.
//!
//! A [`ConnectionHandle`] identifies one accepted transport connection and
//! carries the sending half of that connection's outbound byte queue. The
//! registry and router store handle clones; the session task owns the
//! receiving half and drains it into the socket. Pushes are non-blocking,
//! so no emitter ever waits on a slow connection.

use bytes::Bytes;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// Counter folded into generated ids so two connections accepted in the
/// same nanosecond still get distinct ids.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a connection ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}", timestamp.wrapping_add(counter)))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A live connection's identity plus its outbound queue.
///
/// Cheap to clone. Equality and hashing consider only the connection id,
/// so a handle can live in `HashSet`s keyed by connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<Bytes>,
}

impl ConnectionHandle {
    /// Create a handle and the receiving half of its outbound queue.
    ///
    /// The session task keeps the receiver and forwards drained bytes to
    /// the transport sink.
    #[must_use]
    pub fn channel(id: ConnectionId) -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        (Self { id, outbound }, rx)
    }

    /// The connection's unique identifier.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Queue bytes for delivery to this connection.
    ///
    /// Returns `false` if the connection is already tearing down; callers
    /// treat that as a delivery miss, never an error.
    pub fn push(&self, data: Bytes) -> bool {
        self.outbound.send(data).is_ok()
    }

    /// Whether the receiving side still exists.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

impl Hash for ConnectionHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }

    #[tokio::test]
    async fn test_push_and_closed_detection() {
        let (handle, mut rx) = ConnectionHandle::channel(ConnectionId::new("c1"));

        assert!(handle.push(Bytes::from_static(b"hello")));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"hello"));

        drop(rx);
        assert!(!handle.is_open());
        assert!(!handle.push(Bytes::from_static(b"late")));
    }

    #[test]
    fn test_handle_equality_by_id() {
        let (a, _rx_a) = ConnectionHandle::channel(ConnectionId::new("same"));
        let (b, _rx_b) = ConnectionHandle::channel(ConnectionId::new("same"));
        assert_eq!(a, b);
    }
}
