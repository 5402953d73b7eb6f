//! Connection actor
//!
//! `FtlConnection` translates orchestration protocol bytes on a transport
//! into typed events for the routing core, and typed send operations back
//! into bytes. A single driver task per connection reassembles frames,
//! dispatches requests upward, and answers each one before decoding the
//! next — the peer never observes reordered responses.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Decoder;

use ftl_core::error::ConnectionError;
use ftl_core::traits::{
    ConnectionEvent, ConnectionEventKind, ConnectionResult, NodeConnection, Transport,
};
use ftl_core::types::{ConnectionId, Lifecycle, NodeInfo, NodeLoad};
use ftl_protocol::codec::{Frame, FrameCodec};
use ftl_protocol::frame::MessageDirection;
use ftl_protocol::message::{
    IntroPayload, Message, MessageType, NodeStatePayload, OutroPayload, PublishPayload,
    RelayPayload, SubscriptionPayload,
};
use ftl_protocol::ProtocolError;

/// State shared between the connection handle and its driver task
struct Shared {
    id: ConnectionId,
    hostname: Mutex<String>,
    node_info: Mutex<Option<NodeInfo>>,
    node_load: Mutex<Option<NodeLoad>>,
    lifecycle: Mutex<Lifecycle>,
}

impl Shared {
    fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock().unwrap()
    }

    fn set_lifecycle(&self, next: Lifecycle) {
        *self.lifecycle.lock().unwrap() = next;
    }

    /// Transition only if the connection is currently in `from`
    fn promote(&self, from: Lifecycle, to: Lifecycle) {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        if *lifecycle == from {
            *lifecycle = to;
        }
    }
}

/// A connection to one ingest, edge, or relay node
pub struct FtlConnection<T: Transport> {
    shared: Arc<Shared>,
    transport: Arc<T>,
    events: mpsc::Sender<ConnectionEvent>,
    next_message_id: AtomicU8,
}

impl<T: Transport> FtlConnection<T> {
    /// Wrap a transport. Inbound requests will surface on `events`.
    pub fn new(transport: T, events: mpsc::Sender<ConnectionEvent>) -> Arc<Self> {
        Self::with_hostname(transport, events, String::new())
    }

    /// Wrap a transport with a pre-assigned hostname (outbound
    /// connections know who they are before any intro travels).
    pub fn with_hostname(
        transport: T,
        events: mpsc::Sender<ConnectionEvent>,
        hostname: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(Shared {
                id: ConnectionId::next(),
                hostname: Mutex::new(hostname),
                node_info: Mutex::new(None),
                node_load: Mutex::new(None),
                lifecycle: Mutex::new(Lifecycle::New),
            }),
            transport: Arc::new(transport),
            events,
            next_message_id: AtomicU8::new(0),
        })
    }

    async fn send_message(&self, message: Message) -> Result<(), ConnectionError> {
        let message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let frame = Frame::request(&message, message_id)?;
        self.transport.write(frame.to_bytes()).await?;
        Ok(())
    }
}

#[async_trait]
impl<T: Transport> NodeConnection for FtlConnection<T> {
    fn id(&self) -> ConnectionId {
        self.shared.id
    }

    fn hostname(&self) -> String {
        self.shared.hostname.lock().unwrap().clone()
    }

    fn set_hostname(&self, hostname: &str) {
        *self.shared.hostname.lock().unwrap() = hostname.to_string();
    }

    fn lifecycle(&self) -> Lifecycle {
        self.shared.lifecycle()
    }

    fn node_info(&self) -> Option<NodeInfo> {
        self.shared.node_info.lock().unwrap().clone()
    }

    fn apply_intro(&self, payload: &IntroPayload) {
        *self.shared.node_info.lock().unwrap() = Some(NodeInfo {
            version_major: payload.version_major,
            version_minor: payload.version_minor,
            version_revision: payload.version_revision,
            relay_layer: payload.relay_layer,
            region_code: payload.region_code.clone(),
        });
    }

    fn node_load(&self) -> Option<NodeLoad> {
        *self.shared.node_load.lock().unwrap()
    }

    fn apply_node_state(&self, payload: &NodeStatePayload) {
        *self.shared.node_load.lock().unwrap() = Some(NodeLoad {
            current_load: payload.current_load,
            maximum_load: payload.maximum_load,
        });
    }

    async fn start(&self) -> Result<(), ConnectionError> {
        self.shared.set_lifecycle(Lifecycle::Handshaking);
        if let Err(e) = self.transport.start().await {
            self.shared.set_lifecycle(Lifecycle::Closed);
            return Err(e.into());
        }
        self.shared.set_lifecycle(Lifecycle::Pending);

        let driver = ConnectionDriver {
            shared: Arc::clone(&self.shared),
            transport: Arc::clone(&self.transport),
            events: self.events.clone(),
        };
        tokio::spawn(driver.run());
        Ok(())
    }

    async fn stop(&self) {
        if self.shared.lifecycle() != Lifecycle::Closed {
            self.shared.set_lifecycle(Lifecycle::Draining);
        }
        self.transport.stop();
        self.transport.closed().await;
    }

    async fn send_intro(&self, payload: IntroPayload) -> Result<(), ConnectionError> {
        self.send_message(Message::Intro(payload)).await?;
        // An outbound intro is this side's announcement; the connection is
        // considered introduced once it has been written.
        self.shared.promote(Lifecycle::Pending, Lifecycle::Active);
        Ok(())
    }

    async fn send_outro(&self, payload: OutroPayload) -> Result<(), ConnectionError> {
        self.send_message(Message::Outro(payload)).await
    }

    async fn send_node_state(&self, payload: NodeStatePayload) -> Result<(), ConnectionError> {
        self.send_message(Message::NodeState(payload)).await
    }

    async fn send_channel_subscription(
        &self,
        payload: SubscriptionPayload,
    ) -> Result<(), ConnectionError> {
        self.send_message(Message::ChannelSubscription(payload)).await
    }

    async fn send_stream_publish(&self, payload: PublishPayload) -> Result<(), ConnectionError> {
        self.send_message(Message::StreamPublish(payload)).await
    }

    async fn send_stream_relay(&self, payload: RelayPayload) -> Result<(), ConnectionError> {
        self.send_message(Message::StreamRelay(payload)).await
    }
}

/// The read half of a connection: frame reassembly and dispatch.
/// Runs until the transport closes, then emits the single Closed event.
struct ConnectionDriver<T: Transport> {
    shared: Arc<Shared>,
    transport: Arc<T>,
    events: mpsc::Sender<ConnectionEvent>,
}

impl<T: Transport> ConnectionDriver<T> {
    async fn run(self) {
        let mut codec = FrameCodec::new();
        let mut buffer = BytesMut::new();

        'read: while let Some(chunk) = self.transport.read().await {
            buffer.extend_from_slice(&chunk);
            loop {
                match codec.decode(&mut buffer) {
                    Ok(Some(frame)) => {
                        if !self.handle_frame(frame).await {
                            self.shared.set_lifecycle(Lifecycle::Draining);
                            self.transport.stop();
                            break 'read;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!(
                            connection = %self.shared.id,
                            "frame decoding failed, closing connection: {}", e
                        );
                        self.shared.set_lifecycle(Lifecycle::Draining);
                        self.transport.stop();
                        break 'read;
                    }
                }
            }
        }

        self.transport.closed().await;
        self.shared.set_lifecycle(Lifecycle::Closed);
        let _ = self
            .events
            .send(ConnectionEvent {
                connection_id: self.shared.id,
                kind: ConnectionEventKind::Closed,
            })
            .await;
    }

    /// Process one complete frame. Returns false when the connection must
    /// be torn down (unrecoverable payload defect).
    async fn handle_frame(&self, frame: Frame) -> bool {
        let header = frame.header;
        if header.direction == MessageDirection::Response {
            // Responses are consumed and discarded; request correlation is
            // not tracked on this side yet.
            tracing::trace!(
                connection = %self.shared.id,
                message_id = header.message_id,
                failure = header.failure,
                "discarding response frame"
            );
            return true;
        }

        let Some(message_type) = MessageType::from_u8(header.message_type) else {
            tracing::debug!(
                connection = %self.shared.id,
                tag = header.message_type,
                "ignoring message with unassigned type tag"
            );
            return true;
        };

        match Message::decode(message_type, &frame.payload) {
            Ok(message) => {
                self.dispatch_request(message_type, header.message_id, message)
                    .await;
                true
            }
            Err(e @ ProtocolError::LengthPrefixOverrun { .. }) => {
                tracing::error!(connection = %self.shared.id, "{}", e);
                self.send_response(header.message_type, header.message_id, true)
                    .await;
                true
            }
            Err(e) => {
                tracing::error!(
                    connection = %self.shared.id,
                    "unrecoverable payload defect, closing connection: {}", e
                );
                false
            }
        }
    }

    async fn dispatch_request(&self, message_type: MessageType, message_id: u8, message: Message) {
        let (reply_tx, reply_rx) = oneshot::channel();
        let kind = match message {
            Message::Intro(payload) => ConnectionEventKind::Intro {
                payload,
                reply: reply_tx,
            },
            Message::Outro(payload) => {
                // Peer announced departure; actual teardown happens when the
                // transport closes.
                self.shared.set_lifecycle(Lifecycle::Draining);
                ConnectionEventKind::Outro {
                    payload,
                    reply: reply_tx,
                }
            }
            Message::NodeState(payload) => ConnectionEventKind::NodeState {
                payload,
                reply: reply_tx,
            },
            Message::ChannelSubscription(payload) => ConnectionEventKind::ChannelSubscription {
                payload,
                reply: reply_tx,
            },
            Message::StreamPublish(payload) => ConnectionEventKind::StreamPublish {
                payload,
                reply: reply_tx,
            },
            Message::StreamRelay(payload) => ConnectionEventKind::StreamRelay {
                payload,
                reply: reply_tx,
            },
        };

        let event = ConnectionEvent {
            connection_id: self.shared.id,
            kind,
        };
        let result = if self.events.send(event).await.is_ok() {
            reply_rx.await.unwrap_or_else(|_| ConnectionResult::failed())
        } else {
            ConnectionResult::failed()
        };

        if message_type == MessageType::Intro && result.success {
            self.shared.promote(Lifecycle::Pending, Lifecycle::Active);
        }

        self.send_response(message_type.as_u8(), message_id, !result.success)
            .await;
    }

    async fn send_response(&self, message_type: u8, message_id: u8, failure: bool) {
        let frame = Frame::response(message_type, message_id, failure);
        if let Err(e) = self.transport.write(frame.to_bytes()).await {
            tracing::debug!(
                connection = %self.shared.id,
                "could not send response: {}", e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::DuplexTransport;
    use bytes::{BufMut, Bytes};
    use ftl_protocol::frame::MessageHeader;
    use ftl_protocol::ids::{ChannelId, StreamId};
    use std::time::Duration;
    use tokio::time::timeout;

    /// The peer's side of a connection under test: raw transport plus a
    /// codec for reading what the connection sends back.
    struct Peer {
        transport: DuplexTransport,
        codec: FrameCodec,
        buffer: BytesMut,
    }

    impl Peer {
        async fn send(&self, bytes: &[u8]) {
            self.transport
                .write(Bytes::copy_from_slice(bytes))
                .await
                .unwrap();
        }

        async fn recv_frame(&mut self) -> Frame {
            loop {
                if let Some(frame) = self.codec.decode(&mut self.buffer).unwrap() {
                    return frame;
                }
                let chunk = timeout(Duration::from_secs(5), self.transport.read())
                    .await
                    .expect("timed out waiting for frame")
                    .expect("transport closed while waiting for frame");
                self.buffer.extend_from_slice(&chunk);
            }
        }
    }

    async fn started_connection() -> (
        Arc<FtlConnection<DuplexTransport>>,
        Peer,
        mpsc::Receiver<ConnectionEvent>,
    ) {
        let (local, remote) = DuplexTransport::pair();
        let (event_tx, event_rx) = mpsc::channel(16);
        let connection = FtlConnection::new(local, event_tx);
        connection.start().await.unwrap();
        let peer = Peer {
            transport: remote,
            codec: FrameCodec::new(),
            buffer: BytesMut::new(),
        };
        (connection, peer, event_rx)
    }

    fn publish_wire(message_id: u8) -> Bytes {
        Frame::request(
            &Message::StreamPublish(PublishPayload {
                is_publish: true,
                channel_id: ChannelId::new(1234),
                stream_id: StreamId::new(5678),
            }),
            message_id,
        )
        .unwrap()
        .to_bytes()
    }

    #[tokio::test]
    async fn test_request_reply_response_pairing() {
        let (_connection, mut peer, mut events) = started_connection().await;

        peer.send(&publish_wire(42)).await;

        let event = events.recv().await.unwrap();
        let ConnectionEventKind::StreamPublish { payload, reply } = event.kind else {
            panic!("expected StreamPublish event");
        };
        assert!(payload.is_publish);
        assert_eq!(payload.channel_id, ChannelId::new(1234));
        reply.send(ConnectionResult::ok()).unwrap();

        let response = peer.recv_frame().await;
        assert_eq!(response.header.direction, MessageDirection::Response);
        assert_eq!(response.header.message_id, 42);
        assert!(!response.header.failure);
        assert!(response.payload.is_empty());
    }

    #[tokio::test]
    async fn test_failed_result_sets_failure_bit() {
        let (_connection, mut peer, mut events) = started_connection().await;

        peer.send(&publish_wire(7)).await;
        let event = events.recv().await.unwrap();
        let ConnectionEventKind::StreamPublish { reply, .. } = event.kind else {
            panic!("expected StreamPublish event");
        };
        reply.send(ConnectionResult::failed()).unwrap();

        let response = peer.recv_frame().await;
        assert_eq!(response.header.message_id, 7);
        assert!(response.header.failure);
    }

    #[tokio::test]
    async fn test_byte_at_a_time_yields_one_event() {
        let (_connection, peer, mut events) = started_connection().await;

        let wire = publish_wire(3);
        for byte in wire.iter() {
            peer.send(&[*byte]).await;
        }

        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            event.kind,
            ConnectionEventKind::StreamPublish { .. }
        ));
        // No second event materializes from the same bytes
        assert!(
            timeout(Duration::from_millis(100), events.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_length_prefix_overrun_answers_failure_without_dispatch() {
        let (_connection, mut peer, mut events) = started_connection().await;

        // Intro whose region code length runs past the payload end
        let mut payload = BytesMut::new();
        payload.put_slice(&[0, 0, 0, 0]);
        payload.put_u16(300);
        payload.put_slice(b"host");
        let mut wire = BytesMut::new();
        MessageHeader::request(MessageType::Intro, 9, payload.len() as u16).encode(&mut wire);
        wire.extend_from_slice(&payload);

        peer.send(&wire).await;

        let response = peer.recv_frame().await;
        assert_eq!(response.header.message_id, 9);
        assert!(response.header.failure);
        // The routing core never hears about the malformed request, and the
        // connection stays open for the next one.
        assert!(
            timeout(Duration::from_millis(100), events.recv())
                .await
                .is_err()
        );

        peer.send(&publish_wire(10)).await;
        let event = events.recv().await.unwrap();
        assert!(matches!(
            event.kind,
            ConnectionEventKind::StreamPublish { .. }
        ));
    }

    #[tokio::test]
    async fn test_truncated_fixed_payload_closes_connection() {
        let (connection, mut peer, mut events) = started_connection().await;

        // NodeState with a 4-byte body instead of 8
        let mut wire = BytesMut::new();
        MessageHeader::request(MessageType::NodeState, 1, 4).encode(&mut wire);
        wire.extend_from_slice(&[0, 0, 0, 1]);
        peer.send(&wire).await;

        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event.kind, ConnectionEventKind::Closed));
        assert_eq!(connection.lifecycle(), Lifecycle::Closed);
    }

    #[tokio::test]
    async fn test_partial_header_then_close() {
        let (_connection, peer, mut events) = started_connection().await;

        peer.send(&[0x11, 0x01]).await;
        peer.transport.stop();

        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        // The two stray bytes produce no dispatch, only the closed event
        assert!(matches!(event.kind, ConnectionEventKind::Closed));
    }

    #[tokio::test]
    async fn test_unknown_type_ignored_silently() {
        let (_connection, mut peer, mut events) = started_connection().await;

        let mut wire = BytesMut::new();
        wire.put_u8(9); // request, unassigned tag 9
        wire.put_u8(77);
        wire.put_u16(3);
        wire.put_slice(&[1, 2, 3]);
        peer.send(&wire).await;

        // No event, no response; the next valid frame is still handled
        assert!(
            timeout(Duration::from_millis(100), events.recv())
                .await
                .is_err()
        );
        peer.send(&publish_wire(78)).await;
        let event = events.recv().await.unwrap();
        let ConnectionEventKind::StreamPublish { reply, .. } = event.kind else {
            panic!("expected StreamPublish event");
        };
        reply.send(ConnectionResult::ok()).unwrap();
        let response = peer.recv_frame().await;
        assert_eq!(response.header.message_id, 78);
    }

    #[tokio::test]
    async fn test_inbound_responses_are_discarded() {
        let (_connection, mut peer, mut events) = started_connection().await;

        let mut wire = BytesMut::new();
        MessageHeader::response(MessageType::Intro.as_u8(), 5, false).encode(&mut wire);
        peer.send(&wire).await;

        assert!(
            timeout(Duration::from_millis(100), events.recv())
                .await
                .is_err()
        );

        // Stream stays in sync: a following request round-trips normally
        peer.send(&publish_wire(6)).await;
        let event = events.recv().await.unwrap();
        let ConnectionEventKind::StreamPublish { reply, .. } = event.kind else {
            panic!("expected StreamPublish event");
        };
        reply.send(ConnectionResult::ok()).unwrap();
        assert_eq!(peer.recv_frame().await.header.message_id, 6);
    }

    #[tokio::test]
    async fn test_intro_success_promotes_to_active() {
        let (connection, mut peer, mut events) = started_connection().await;
        assert_eq!(connection.lifecycle(), Lifecycle::Pending);

        let wire = Frame::request(
            &Message::Intro(IntroPayload {
                version_major: 0,
                version_minor: 1,
                version_revision: 0,
                relay_layer: 0,
                region_code: "eu".to_string(),
                hostname: "ingest-a".to_string(),
            }),
            1,
        )
        .unwrap()
        .to_bytes();
        peer.send(&wire).await;

        let event = events.recv().await.unwrap();
        let ConnectionEventKind::Intro { reply, .. } = event.kind else {
            panic!("expected Intro event");
        };
        reply.send(ConnectionResult::ok()).unwrap();
        peer.recv_frame().await;

        assert_eq!(connection.lifecycle(), Lifecycle::Active);
    }

    #[tokio::test]
    async fn test_outgoing_message_ids_increment() {
        let (connection, mut peer, _events) = started_connection().await;

        connection
            .send_stream_publish(PublishPayload {
                is_publish: true,
                channel_id: ChannelId::new(1),
                stream_id: StreamId::new(2),
            })
            .await
            .unwrap();
        connection
            .send_stream_publish(PublishPayload {
                is_publish: false,
                channel_id: ChannelId::new(1),
                stream_id: StreamId::new(2),
            })
            .await
            .unwrap();

        assert_eq!(peer.recv_frame().await.header.message_id, 0);
        assert_eq!(peer.recv_frame().await.header.message_id, 1);
    }
}
