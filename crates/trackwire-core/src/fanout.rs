//! Fan-out engine.
//!
//! Emission entry points consumed by backend business logic. Delivery is
//! best-effort, at-most-once, fire and forget: each event frame is encoded
//! once, then the shared bytes are pushed to every recipient's outbound
//! queue independently. A recipient that closed microseconds earlier is a
//! delivery miss, counted and logged, never an error to the caller.

use crate::handle::ConnectionHandle;
use crate::registry::ConnectionRegistry;
use crate::router::TopicRouter;
use crate::topic::{Topic, TopicError};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace, warn};
use trackwire_protocol::{codec, Frame};

/// Event names emitted by the business entry points.
pub mod events {
    /// A package's status changed.
    pub const PACKAGE_UPDATED: &str = "package:updated";
    /// A package reached its final delivered state.
    pub const PACKAGE_DELIVERED: &str = "package:delivered";
    /// A review was created for a hub.
    pub const HUB_REVIEW_CREATED: &str = "hub:review:created";
    /// A batch's status changed.
    pub const BATCH_UPDATED: &str = "batch:updated";
}

/// Point-in-time snapshot of live connection state.
#[derive(Debug, Clone, Serialize)]
pub struct FanoutStats {
    /// Live connections across all identities.
    pub total_connections: usize,
    /// Identities with at least one live connection.
    pub total_users: usize,
    /// Topics with at least one member.
    pub topics: Vec<String>,
}

/// The fan-out engine.
///
/// Cheap to clone; hand one to every piece of business logic that emits.
#[derive(Clone)]
pub struct FanoutEngine {
    registry: Arc<ConnectionRegistry>,
    router: Arc<TopicRouter>,
}

impl FanoutEngine {
    /// Create an engine over shared registry and router state.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, router: Arc<TopicRouter>) -> Self {
        Self { registry, router }
    }

    /// The underlying connection registry.
    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// The underlying topic router.
    #[must_use]
    pub fn router(&self) -> &TopicRouter {
        &self.router
    }

    /// Deliver an event to every current member of a topic.
    ///
    /// An empty topic is a cheap no-op. Returns the number of recipients
    /// the event was queued for; callers are free to ignore it.
    pub fn emit_to_topic(&self, topic: &Topic, event: &str, data: Value) -> usize {
        let audience = self.router.members_of(topic);
        if audience.is_empty() {
            trace!(topic = %topic, event = event, "No subscribers, dropping event");
            return 0;
        }
        self.deliver(&audience, event, data)
    }

    /// Deliver an event to every connection a user currently owns.
    pub fn emit_to_user(&self, identity: &str, event: &str, data: Value) -> usize {
        let audience = self.registry.connections_for(identity);
        if audience.is_empty() {
            trace!(identity = %identity, event = event, "User offline, dropping event");
            return 0;
        }
        self.deliver(&audience, event, data)
    }

    /// Deliver an event to every live connection, regardless of topics.
    pub fn broadcast_all(&self, event: &str, data: Value) -> usize {
        let audience = self.registry.all_handles();
        if audience.is_empty() {
            return 0;
        }
        self.deliver(&audience, event, data)
    }

    /// A package's status changed.
    pub fn package_updated(&self, tracking_number: &str, payload: Value) -> usize {
        self.emit_to_entity(Topic::package(tracking_number), events::PACKAGE_UPDATED, payload)
    }

    /// A package was delivered.
    pub fn package_delivered(&self, tracking_number: &str, payload: Value) -> usize {
        self.emit_to_entity(
            Topic::package(tracking_number),
            events::PACKAGE_DELIVERED,
            payload,
        )
    }

    /// A review was created for a hub.
    pub fn hub_review_created(&self, hub_id: &str, payload: Value) -> usize {
        self.emit_to_entity(Topic::hub(hub_id), events::HUB_REVIEW_CREATED, payload)
    }

    /// A batch's status changed.
    pub fn batch_updated(&self, batch_id: &str, payload: Value) -> usize {
        self.emit_to_entity(Topic::batch(batch_id), events::BATCH_UPDATED, payload)
    }

    /// Direct notification to a user, outside any topic.
    pub fn notify_user(&self, identity: &str, event: &str, payload: Value) -> usize {
        self.emit_to_user(identity, event, payload)
    }

    fn emit_to_entity(
        &self,
        topic: Result<Topic, TopicError>,
        event: &str,
        payload: Value,
    ) -> usize {
        match topic {
            Ok(topic) => self.emit_to_topic(&topic, event, payload),
            Err(e) => {
                warn!(event = event, error = %e, "Unroutable event, dropping");
                0
            }
        }
    }

    fn deliver(&self, audience: &[ConnectionHandle], event: &str, data: Value) -> usize {
        let encoded = match codec::encode(&Frame::event(event, data)) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(event = event, error = %e, "Failed to encode event, dropping");
                return 0;
            }
        };

        let mut delivered = 0;
        for handle in audience {
            if handle.push(encoded.clone()) {
                delivered += 1;
            } else {
                trace!(connection = %handle.id(), event = event, "Delivery miss");
            }
        }

        debug!(event = event, recipients = delivered, "Event fanned out");
        delivered
    }

    /// Operational snapshot for health/metrics collection.
    #[must_use]
    pub fn stats(&self) -> FanoutStats {
        FanoutStats {
            total_connections: self.registry.total_connections(),
            total_users: self.registry.total_users(),
            topics: self
                .router
                .all_topics()
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{ConnectionHandle, ConnectionId};
    use bytes::Bytes;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn engine() -> FanoutEngine {
        FanoutEngine::new(
            Arc::new(ConnectionRegistry::new()),
            Arc::new(TopicRouter::new()),
        )
    }

    fn connect(
        engine: &FanoutEngine,
        identity: &str,
        id: &str,
    ) -> (ConnectionHandle, UnboundedReceiver<Bytes>) {
        let (handle, rx) = ConnectionHandle::channel(ConnectionId::new(id));
        engine.registry().register(identity, handle.clone());
        (handle, rx)
    }

    fn recv_event(rx: &mut UnboundedReceiver<Bytes>) -> Frame {
        let bytes = rx.try_recv().expect("expected a delivery");
        codec::decode(&bytes).expect("delivered frame should decode")
    }

    #[tokio::test]
    async fn test_emit_to_topic_reaches_all_members() {
        let engine = engine();
        let topic = Topic::package("TRK-1").unwrap();

        let (a, mut rx_a) = connect(&engine, "u1", "a");
        let (b, mut rx_b) = connect(&engine, "u2", "b");
        let (_c, mut rx_c) = connect(&engine, "u3", "c");
        engine.router().join(&topic, &a).unwrap();
        engine.router().join(&topic, &b).unwrap();

        let delivered =
            engine.emit_to_topic(&topic, "package:updated", json!({"status": "DELIVERED"}));
        assert_eq!(delivered, 2);

        for rx in [&mut rx_a, &mut rx_b] {
            match recv_event(rx) {
                Frame::Event { event, data } => {
                    assert_eq!(event, "package:updated");
                    assert_eq!(data, json!({"status": "DELIVERED"}));
                }
                other => panic!("unexpected frame: {other:?}"),
            }
        }
        // The unsubscribed connection sees nothing.
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_emit_to_empty_topic_is_noop() {
        let engine = engine();
        let topic = Topic::hub("H1").unwrap();

        assert_eq!(engine.emit_to_topic(&topic, "hub:review:created", json!({})), 0);
    }

    #[tokio::test]
    async fn test_emit_to_user_reaches_every_device() {
        let engine = engine();

        let (_a1, mut rx_1) = connect(&engine, "u1", "a1");
        let (_a2, mut rx_2) = connect(&engine, "u1", "a2");

        let delivered = engine.emit_to_user("u1", "notification", json!({"msg": "hi"}));
        assert_eq!(delivered, 2);

        for rx in [&mut rx_1, &mut rx_2] {
            match recv_event(rx) {
                Frame::Event { event, .. } => assert_eq!(event, "notification"),
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_emit_after_disconnect_delivers_nothing() {
        let engine = engine();
        let topic = Topic::hub("H1").unwrap();

        let (a, rx) = connect(&engine, "u1", "a");
        engine.router().join(&topic, &a).unwrap();

        // Disconnect teardown: leave all topics, then unregister.
        engine.router().leave_all(a.id());
        engine.registry().unregister("u1", a.id());
        drop(rx);
        drop(a);

        assert_eq!(engine.emit_to_topic(&topic, "hub:review:created", json!({})), 0);
    }

    #[tokio::test]
    async fn test_delivery_miss_does_not_abort_batch() {
        let engine = engine();
        let topic = Topic::batch("B1").unwrap();

        let (a, rx_a) = connect(&engine, "u1", "a");
        let (b, mut rx_b) = connect(&engine, "u2", "b");
        engine.router().join(&topic, &a).unwrap();
        engine.router().join(&topic, &b).unwrap();

        // Simulate a connection whose session died without teardown yet.
        drop(rx_a);

        let delivered = engine.emit_to_topic(&topic, "batch:updated", json!({"s": 1}));
        assert_eq!(delivered, 1);
        assert!(matches!(recv_event(&mut rx_b), Frame::Event { .. }));
    }

    #[tokio::test]
    async fn test_broadcast_all() {
        let engine = engine();

        let (_a, mut rx_a) = connect(&engine, "u1", "a");
        let (_b, mut rx_b) = connect(&engine, "u2", "b");

        let delivered = engine.broadcast_all("system:maintenance", json!({"at": "02:00"}));
        assert_eq!(delivered, 2);
        assert!(matches!(recv_event(&mut rx_a), Frame::Event { .. }));
        assert!(matches!(recv_event(&mut rx_b), Frame::Event { .. }));
    }

    #[tokio::test]
    async fn test_business_entry_points_route_by_discriminator() {
        let engine = engine();
        let (a, mut rx_a) = connect(&engine, "u1", "a");
        engine
            .router()
            .join(&Topic::package("TRK-9").unwrap(), &a)
            .unwrap();

        assert_eq!(engine.package_updated("TRK-9", json!({"status": "IN_TRANSIT"})), 1);
        assert_eq!(engine.package_updated("TRK-0", json!({})), 0);
        assert_eq!(engine.hub_review_created("H1", json!({})), 0);

        match recv_event(&mut rx_a) {
            Frame::Event { event, .. } => assert_eq!(event, events::PACKAGE_UPDATED),
            other => panic!("unexpected frame: {other:?}"),
        }

        // Invalid discriminators drop the event instead of erroring.
        assert_eq!(engine.package_updated("", json!({})), 0);
    }

    #[tokio::test]
    async fn test_stats_snapshot() {
        let engine = engine();

        let (a1, _rx_1) = connect(&engine, "u1", "a1");
        let (_a2, _rx_2) = connect(&engine, "u1", "a2");
        let (_b1, _rx_3) = connect(&engine, "u2", "b1");
        engine
            .router()
            .join(&Topic::package("TRK-1").unwrap(), &a1)
            .unwrap();

        let stats = engine.stats();
        assert_eq!(stats.total_connections, 3);
        assert_eq!(stats.total_users, 2);
        assert_eq!(stats.topics, vec!["package:TRK-1".to_string()]);
    }
}
