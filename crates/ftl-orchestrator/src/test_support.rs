//! Shared test doubles for in-crate unit tests

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use ftl_core::error::ConnectionError;
use ftl_core::traits::NodeConnection;
use ftl_core::types::{ConnectionId, Lifecycle, NodeInfo, NodeLoad};
use ftl_protocol::message::{
    IntroPayload, NodeStatePayload, OutroPayload, PublishPayload, RelayPayload,
    SubscriptionPayload,
};

/// In-memory connection fake. Records every relay instruction it is told
/// to send, which is all the routing tests need to observe.
pub(crate) struct StubConnection {
    id: ConnectionId,
    hostname: Mutex<String>,
    node_info: Mutex<Option<NodeInfo>>,
    node_load: Mutex<Option<NodeLoad>>,
    lifecycle: Mutex<Lifecycle>,
    pub(crate) sent_relays: Mutex<Vec<RelayPayload>>,
}

impl StubConnection {
    pub(crate) fn new(hostname: &str) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::next(),
            hostname: Mutex::new(hostname.to_string()),
            node_info: Mutex::new(None),
            node_load: Mutex::new(None),
            lifecycle: Mutex::new(Lifecycle::Pending),
            sent_relays: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn relays(&self) -> Vec<RelayPayload> {
        self.sent_relays.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodeConnection for StubConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn hostname(&self) -> String {
        self.hostname.lock().unwrap().clone()
    }

    fn set_hostname(&self, hostname: &str) {
        *self.hostname.lock().unwrap() = hostname.to_string();
    }

    fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock().unwrap()
    }

    fn node_info(&self) -> Option<NodeInfo> {
        self.node_info.lock().unwrap().clone()
    }

    fn apply_intro(&self, payload: &IntroPayload) {
        *self.node_info.lock().unwrap() = Some(NodeInfo {
            version_major: payload.version_major,
            version_minor: payload.version_minor,
            version_revision: payload.version_revision,
            relay_layer: payload.relay_layer,
            region_code: payload.region_code.clone(),
        });
    }

    fn node_load(&self) -> Option<NodeLoad> {
        *self.node_load.lock().unwrap()
    }

    fn apply_node_state(&self, payload: &NodeStatePayload) {
        *self.node_load.lock().unwrap() = Some(NodeLoad {
            current_load: payload.current_load,
            maximum_load: payload.maximum_load,
        });
    }

    async fn start(&self) -> Result<(), ConnectionError> {
        Ok(())
    }

    async fn stop(&self) {
        *self.lifecycle.lock().unwrap() = Lifecycle::Closed;
    }

    async fn send_intro(&self, _payload: IntroPayload) -> Result<(), ConnectionError> {
        Ok(())
    }

    async fn send_outro(&self, _payload: OutroPayload) -> Result<(), ConnectionError> {
        Ok(())
    }

    async fn send_node_state(&self, _payload: NodeStatePayload) -> Result<(), ConnectionError> {
        Ok(())
    }

    async fn send_channel_subscription(
        &self,
        _payload: SubscriptionPayload,
    ) -> Result<(), ConnectionError> {
        Ok(())
    }

    async fn send_stream_publish(&self, _payload: PublishPayload) -> Result<(), ConnectionError> {
        Ok(())
    }

    async fn send_stream_relay(&self, payload: RelayPayload) -> Result<(), ConnectionError> {
        self.sent_relays.lock().unwrap().push(payload);
        Ok(())
    }
}
