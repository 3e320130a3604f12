//! Frame types for the Trackwire client protocol.
//!
//! Frames are the unit of exchange between a connected client and the
//! server. Each frame is serialized using MessagePack, discriminated by
//! its `op` field.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Rejection codes carried in [`Frame::Rejected`].
pub mod reject {
    /// Message could not be parsed into a known operation.
    pub const MALFORMED: u16 = 1001;
    /// Unknown subscription scope or invalid entity id.
    pub const BAD_TOPIC: u16 = 1002;
    /// Per-connection subscription limit reached.
    pub const SUBSCRIPTION_LIMIT: u16 = 1003;
    /// Frame is well-formed but not accepted from clients.
    pub const UNEXPECTED: u16 = 1004;
}

/// A protocol frame.
///
/// `Join`, `Leave` and `Ping` are client-to-server; the rest are
/// server-to-client. Every join/leave is acknowledged with the resolved
/// topic name so clients can correlate without tracking request ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Frame {
    /// Subscribe to updates for one logistics entity.
    #[serde(rename = "join")]
    Join {
        /// Entity kind: `package`, `hub` or `batch`.
        scope: String,
        /// Entity discriminator (tracking number, hub id, batch id).
        id: String,
    },

    /// Unsubscribe from one logistics entity.
    #[serde(rename = "leave")]
    Leave {
        /// Entity kind: `package`, `hub` or `batch`.
        scope: String,
        /// Entity discriminator.
        id: String,
    },

    /// Keepalive probe.
    #[serde(rename = "ping")]
    Ping,

    /// Handshake accepted; sent once, before any other server frame.
    #[serde(rename = "connected")]
    Connected {
        /// Unique connection identifier.
        connection_id: String,
        /// Recommended keepalive interval in milliseconds.
        heartbeat_ms: u64,
    },

    /// Acknowledges a `join` with the resolved topic name.
    #[serde(rename = "joined")]
    Joined {
        /// Resolved topic, e.g. `package:TRK-1`.
        topic: String,
    },

    /// Acknowledges a `leave` with the resolved topic name.
    #[serde(rename = "left")]
    Left {
        /// Resolved topic.
        topic: String,
    },

    /// Keepalive reply.
    #[serde(rename = "pong")]
    Pong {
        /// Server timestamp in milliseconds since the Unix epoch.
        ts: u64,
    },

    /// A business event pushed to a subscriber.
    #[serde(rename = "event")]
    Event {
        /// Event name, e.g. `package:updated`.
        event: String,
        /// Opaque payload defined by the emitting business logic.
        data: Value,
    },

    /// A single inbound message was refused; the connection stays open.
    #[serde(rename = "rejected")]
    Rejected {
        /// One of the [`reject`] codes.
        code: u16,
        /// Human-readable reason.
        reason: String,
    },
}

impl Frame {
    /// Short frame name for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Join { .. } => "join",
            Frame::Leave { .. } => "leave",
            Frame::Ping => "ping",
            Frame::Connected { .. } => "connected",
            Frame::Joined { .. } => "joined",
            Frame::Left { .. } => "left",
            Frame::Pong { .. } => "pong",
            Frame::Event { .. } => "event",
            Frame::Rejected { .. } => "rejected",
        }
    }

    /// Create a new Join frame.
    #[must_use]
    pub fn join(scope: impl Into<String>, id: impl Into<String>) -> Self {
        Frame::Join {
            scope: scope.into(),
            id: id.into(),
        }
    }

    /// Create a new Leave frame.
    #[must_use]
    pub fn leave(scope: impl Into<String>, id: impl Into<String>) -> Self {
        Frame::Leave {
            scope: scope.into(),
            id: id.into(),
        }
    }

    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, heartbeat_ms: u64) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            heartbeat_ms,
        }
    }

    /// Create a new Joined acknowledgment.
    #[must_use]
    pub fn joined(topic: impl Into<String>) -> Self {
        Frame::Joined {
            topic: topic.into(),
        }
    }

    /// Create a new Left acknowledgment.
    #[must_use]
    pub fn left(topic: impl Into<String>) -> Self {
        Frame::Left {
            topic: topic.into(),
        }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(ts: u64) -> Self {
        Frame::Pong { ts }
    }

    /// Create a new Event frame.
    #[must_use]
    pub fn event(event: impl Into<String>, data: Value) -> Self {
        Frame::Event {
            event: event.into(),
            data,
        }
    }

    /// Create a new Rejected frame.
    #[must_use]
    pub fn rejected(code: u16, reason: impl Into<String>) -> Self {
        Frame::Rejected {
            code,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_kind() {
        assert_eq!(Frame::join("package", "TRK-1").kind(), "join");
        assert_eq!(Frame::pong(42).kind(), "pong");
        assert_eq!(
            Frame::event("package:updated", json!({"status": "DELIVERED"})).kind(),
            "event"
        );
    }

    #[test]
    fn test_join_ack_carries_topic() {
        let ack = Frame::joined("hub:H1");
        match ack {
            Frame::Joined { topic } => assert_eq!(topic, "hub:H1"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
