//! Per-connection session task.
//!
//! The HTTP layer admits only authenticated connections (see
//! `handlers::ws_handler`), so a session starts life with a resolved
//! identity. From there it registers the connection, dispatches inbound
//! frames in arrival order, and on transport close tears down router
//! membership before the registry entry so no emission can reach a handle
//! that is mid-teardown.

use crate::handlers::AppState;
use crate::metrics;
use axum::extract::ws::{Message, WebSocket};
use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};
use trackwire_core::{ConnectionHandle, ConnectionId, Topic, UserId};
use trackwire_protocol::{codec, reject, Frame};

/// Session state for one authenticated connection.
struct Session {
    id: ConnectionId,
    identity: UserId,
    handle: ConnectionHandle,
    state: Arc<AppState>,
    buffer: BytesMut,
}

impl Session {
    fn new(identity: UserId, handle: ConnectionHandle, state: Arc<AppState>) -> Self {
        Self {
            id: handle.id().clone(),
            identity,
            handle,
            state,
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Queue a frame on this connection's outbound channel.
    fn push(&self, frame: &Frame) {
        match codec::encode(frame) {
            Ok(bytes) => {
                self.handle.push(bytes);
            }
            Err(e) => warn!(connection = %self.id, error = %e, "Failed to encode reply"),
        }
    }

    /// Feed transport bytes into the session, dispatching every complete
    /// frame. Returns `false` once the stream is unrecoverable.
    fn handle_incoming(&mut self, data: &[u8]) -> bool {
        self.buffer.extend_from_slice(data);

        loop {
            match codec::decode_from(&mut self.buffer) {
                Ok(Some(frame)) => {
                    metrics::record_message(data.len(), "inbound");
                    self.dispatch(frame);
                }
                Ok(None) => return true,
                Err(e) if e.is_recoverable() => {
                    // The bad frame was consumed; reject it and keep going.
                    metrics::record_error("malformed");
                    debug!(connection = %self.id, error = %e, "Rejected malformed message");
                    self.push(&Frame::rejected(reject::MALFORMED, "unparseable message"));
                }
                Err(e) => {
                    metrics::record_error("protocol");
                    warn!(connection = %self.id, error = %e, "Protocol violation, closing");
                    return false;
                }
            }
        }
    }

    /// Apply one inbound frame. Per-message failures answer only this
    /// connection and never close it.
    fn dispatch(&mut self, frame: Frame) {
        match frame {
            Frame::Join { scope, id } => match Topic::resolve(&scope, &id) {
                Ok(topic) => match self.state.fanout.router().join(&topic, &self.handle) {
                    Ok(()) => {
                        metrics::record_subscription();
                        metrics::set_active_topics(self.state.fanout.router().topic_count());
                        self.push(&Frame::joined(topic.as_str()));
                    }
                    Err(e) => {
                        self.push(&Frame::rejected(reject::SUBSCRIPTION_LIMIT, e.to_string()));
                    }
                },
                Err(e) => self.push(&Frame::rejected(reject::BAD_TOPIC, e.to_string())),
            },

            Frame::Leave { scope, id } => match Topic::resolve(&scope, &id) {
                Ok(topic) => {
                    self.state.fanout.router().leave(&topic, self.handle.id());
                    metrics::set_active_topics(self.state.fanout.router().topic_count());
                    self.push(&Frame::left(topic.as_str()));
                }
                Err(e) => self.push(&Frame::rejected(reject::BAD_TOPIC, e.to_string())),
            },

            Frame::Ping => self.push(&Frame::pong(now_ms())),

            other => {
                debug!(connection = %self.id, frame = other.kind(), "Unexpected frame from client");
                self.push(&Frame::rejected(
                    reject::UNEXPECTED,
                    format!("unexpected frame: {}", other.kind()),
                ));
            }
        }
    }

    /// Disconnect teardown. Router first, then registry, so a concurrent
    /// emitter either still delivers to the live queue or finds the
    /// handle cleanly absent.
    fn teardown(&self) {
        self.state.fanout.router().leave_all(&self.id);
        self.state
            .fanout
            .registry()
            .unregister(&self.identity, &self.id);
        metrics::set_active_topics(self.state.fanout.router().topic_count());
        metrics::set_active_users(self.state.fanout.registry().total_users());
    }
}

/// Run a session over an upgraded, authenticated WebSocket.
pub(crate) async fn run(socket: WebSocket, identity: UserId, state: Arc<AppState>) {
    let _metrics_guard = metrics::ConnectionMetricsGuard::new();

    let id = ConnectionId::generate();
    debug!(connection = %id, identity = %identity, "Session started");

    let (mut sink, mut stream) = socket.split();
    let (handle, mut outbound) = ConnectionHandle::channel(id.clone());

    // Writer task: drains the outbound queue into the socket. Acks and
    // fanned-out events share the queue, so per-connection order holds.
    let writer = tokio::spawn(async move {
        while let Some(data) = outbound.recv().await {
            metrics::record_message(data.len(), "outbound");
            if sink.send(Message::Binary(data.to_vec())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut session = Session::new(identity.clone(), handle.clone(), Arc::clone(&state));
    state.fanout.registry().register(&identity, handle.clone());
    metrics::set_active_users(state.fanout.registry().total_users());
    session.push(&Frame::connected(
        id.as_str(),
        state.config.heartbeat.interval_ms,
    ));

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Binary(data)) => {
                let start = Instant::now();
                if !session.handle_incoming(&data) {
                    break;
                }
                metrics::record_latency(start.elapsed().as_secs_f64());
            }
            Ok(Message::Text(text)) => {
                if !session.handle_incoming(text.as_bytes()) {
                    break;
                }
            }
            // The transport layer answers pings itself.
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                debug!(connection = %id, "Received close frame");
                break;
            }
            Err(e) => {
                metrics::record_error("websocket");
                warn!(connection = %id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    session.teardown();
    drop(session);
    drop(handle);

    // With the registry and router entries gone, ours were the last queue
    // senders; the writer drains what was already queued and exits.
    let _ = writer.await;

    debug!(connection = %id, "Session closed");
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use bytes::{BufMut, Bytes};
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;
    use trackwire_core::StaticTokenVerifier;

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState::new(
            Config::default(),
            Arc::new(StaticTokenVerifier::new()),
        ))
    }

    fn test_session(
        state: &Arc<AppState>,
        identity: &str,
        conn: &str,
    ) -> (Session, UnboundedReceiver<Bytes>) {
        let (handle, rx) = ConnectionHandle::channel(ConnectionId::new(conn));
        state.fanout.registry().register(identity, handle.clone());
        (
            Session::new(identity.to_string(), handle, Arc::clone(state)),
            rx,
        )
    }

    fn recv_frame(rx: &mut UnboundedReceiver<Bytes>) -> Frame {
        let bytes = rx.try_recv().expect("expected a reply frame");
        codec::decode(&bytes).expect("reply frame should decode")
    }

    #[tokio::test]
    async fn test_join_acks_with_resolved_topic() {
        let state = test_state();
        let (mut session, mut rx) = test_session(&state, "u1", "c1");

        session.dispatch(Frame::join("package", "TRK-1"));

        assert_eq!(recv_frame(&mut rx), Frame::joined("package:TRK-1"));
        let topic = Topic::package("TRK-1").unwrap();
        assert!(state.fanout.router().is_member(&topic, session.handle.id()));
    }

    #[tokio::test]
    async fn test_leave_acks_and_removes_membership() {
        let state = test_state();
        let (mut session, mut rx) = test_session(&state, "u1", "c1");

        session.dispatch(Frame::join("hub", "H1"));
        session.dispatch(Frame::leave("hub", "H1"));

        assert_eq!(recv_frame(&mut rx), Frame::joined("hub:H1"));
        assert_eq!(recv_frame(&mut rx), Frame::left("hub:H1"));
        let topic = Topic::hub("H1").unwrap();
        assert!(!state.fanout.router().is_member(&topic, session.handle.id()));
    }

    #[tokio::test]
    async fn test_unknown_scope_is_rejected_not_fatal() {
        let state = test_state();
        let (mut session, mut rx) = test_session(&state, "u1", "c1");

        session.dispatch(Frame::join("warehouse", "W1"));
        match recv_frame(&mut rx) {
            Frame::Rejected { code, .. } => assert_eq!(code, reject::BAD_TOPIC),
            other => panic!("unexpected frame: {other:?}"),
        }

        // The connection keeps working afterwards.
        session.dispatch(Frame::join("package", "TRK-1"));
        assert_eq!(recv_frame(&mut rx), Frame::joined("package:TRK-1"));
    }

    #[tokio::test]
    async fn test_malformed_message_rejected_stream_survives() {
        let state = test_state();
        let (mut session, mut rx) = test_session(&state, "u1", "c1");

        // A length-prefixed garbage payload, then a valid join.
        let mut data = BytesMut::new();
        let garbage = [0xc1u8, 0x00, 0x00];
        data.put_u32(garbage.len() as u32);
        data.extend_from_slice(&garbage);
        data.extend_from_slice(&codec::encode(&Frame::join("batch", "B1")).unwrap());

        assert!(session.handle_incoming(&data));

        match recv_frame(&mut rx) {
            Frame::Rejected { code, .. } => assert_eq!(code, reject::MALFORMED),
            other => panic!("unexpected frame: {other:?}"),
        }
        assert_eq!(recv_frame(&mut rx), Frame::joined("batch:B1"));
    }

    #[tokio::test]
    async fn test_oversized_frame_is_fatal() {
        let state = test_state();
        let (mut session, _rx) = test_session(&state, "u1", "c1");

        let mut data = BytesMut::new();
        data.put_u32(u32::MAX);
        assert!(!session.handle_incoming(&data));
    }

    #[tokio::test]
    async fn test_ping_answers_with_timestamp() {
        let state = test_state();
        let (mut session, mut rx) = test_session(&state, "u1", "c1");

        session.dispatch(Frame::Ping);
        match recv_frame(&mut rx) {
            Frame::Pong { ts } => assert!(ts > 0),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_server_frames_from_client_are_rejected() {
        let state = test_state();
        let (mut session, mut rx) = test_session(&state, "u1", "c1");

        session.dispatch(Frame::event("package:updated", json!({})));
        match recv_frame(&mut rx) {
            Frame::Rejected { code, .. } => assert_eq!(code, reject::UNEXPECTED),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_teardown_clears_router_then_registry() {
        let state = test_state();
        let (mut session, _rx) = test_session(&state, "u1", "c1");

        session.dispatch(Frame::join("package", "TRK-1"));
        session.dispatch(Frame::join("hub", "H1"));
        session.teardown();

        assert_eq!(state.fanout.router().topic_count(), 0);
        assert!(state.fanout.registry().connections_for("u1").is_empty());
        assert_eq!(state.fanout.registry().total_users(), 0);

        // A later emission to the old topic delivers to nobody.
        let topic = Topic::package("TRK-1").unwrap();
        assert_eq!(state.fanout.emit_to_topic(&topic, "package:updated", json!({})), 0);
    }

    #[tokio::test]
    async fn test_event_delivery_interleaves_with_acks_in_order() {
        let state = test_state();
        let (mut session, mut rx) = test_session(&state, "u1", "c1");

        session.dispatch(Frame::join("package", "TRK-1"));
        let topic = Topic::package("TRK-1").unwrap();
        state
            .fanout
            .emit_to_topic(&topic, "package:updated", json!({"status": "IN_TRANSIT"}));

        assert_eq!(recv_frame(&mut rx), Frame::joined("package:TRK-1"));
        assert!(matches!(recv_frame(&mut rx), Frame::Event { .. }));
    }
}
