//! Connection capability and event surface
//!
//! A `NodeConnection` is the routing core's view of one peer: identity,
//! metadata learned from its intro, and the six outbound message
//! operations. Inbound requests surface as `ConnectionEvent`s on an mpsc
//! channel; each request carries a oneshot reply whose `ConnectionResult`
//! becomes the failure bit of the response frame. The connection answers
//! a request before it decodes the peer's next frame, so replying promptly
//! keeps the peer's pipeline moving.

use async_trait::async_trait;
use tokio::sync::oneshot;

use ftl_protocol::message::{
    IntroPayload, NodeStatePayload, OutroPayload, PublishPayload, RelayPayload,
    SubscriptionPayload,
};

use crate::error::ConnectionError;
use crate::types::{ConnectionId, Lifecycle, NodeInfo, NodeLoad};

/// Outcome of handling a request; reported back to the peer through the
/// response's failure flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionResult {
    pub success: bool,
}

impl ConnectionResult {
    /// Successful handling
    pub fn ok() -> Self {
        Self { success: true }
    }

    /// Failed handling; the peer sees the failure bit set
    pub fn failed() -> Self {
        Self { success: false }
    }
}

/// An event surfaced by a connection, addressed by its handle
#[derive(Debug)]
pub struct ConnectionEvent {
    pub connection_id: ConnectionId,
    pub kind: ConnectionEventKind,
}

/// The seven things a connection can tell the layer above it
#[derive(Debug)]
pub enum ConnectionEventKind {
    Intro {
        payload: IntroPayload,
        reply: oneshot::Sender<ConnectionResult>,
    },
    Outro {
        payload: OutroPayload,
        reply: oneshot::Sender<ConnectionResult>,
    },
    NodeState {
        payload: NodeStatePayload,
        reply: oneshot::Sender<ConnectionResult>,
    },
    ChannelSubscription {
        payload: SubscriptionPayload,
        reply: oneshot::Sender<ConnectionResult>,
    },
    StreamPublish {
        payload: PublishPayload,
        reply: oneshot::Sender<ConnectionResult>,
    },
    StreamRelay {
        payload: RelayPayload,
        reply: oneshot::Sender<ConnectionResult>,
    },
    /// The connection has fully closed. Emitted at most once.
    Closed,
}

/// Abstraction over a connection to an ingest, edge, or relay node
#[async_trait]
pub trait NodeConnection: Send + Sync + 'static {
    /// Stable handle for this connection
    fn id(&self) -> ConnectionId;

    /// Hostname of the node, empty until its intro arrives
    fn hostname(&self) -> String;

    /// Record the node's hostname (set exactly once, from the first intro)
    fn set_hostname(&self, hostname: &str);

    /// Current lifecycle state
    fn lifecycle(&self) -> Lifecycle;

    /// Metadata from the node's intro, if one has been received
    fn node_info(&self) -> Option<NodeInfo>;

    /// Record intro metadata
    fn apply_intro(&self, payload: &IntroPayload);

    /// Most recent load report, if any
    fn node_load(&self) -> Option<NodeLoad>;

    /// Record a load report
    fn apply_node_state(&self, payload: &NodeStatePayload);

    /// Bring up the transport and begin processing inbound frames
    async fn start(&self) -> Result<(), ConnectionError>;

    /// Shut the connection down and wait for it to fully close
    async fn stop(&self);

    async fn send_intro(&self, payload: IntroPayload) -> Result<(), ConnectionError>;
    async fn send_outro(&self, payload: OutroPayload) -> Result<(), ConnectionError>;
    async fn send_node_state(&self, payload: NodeStatePayload) -> Result<(), ConnectionError>;
    async fn send_channel_subscription(
        &self,
        payload: SubscriptionPayload,
    ) -> Result<(), ConnectionError>;
    async fn send_stream_publish(&self, payload: PublishPayload) -> Result<(), ConnectionError>;
    async fn send_stream_relay(&self, payload: RelayPayload) -> Result<(), ConnectionError>;
}
