//! Routing core
//!
//! The orchestrator owns every live connection, the stream and subscription
//! stores, and the rule that ties them together: for each (stream,
//! subscription) pair on the same channel, exactly one outstanding start
//! relay instruction has been sent to the stream's origin, and a matching
//! stop is sent when the pair dissolves.
//!
//! Events arrive on one mpsc channel and are dispatched by connection
//! handle; handlers run inline on the dispatch task. Store locks are never
//! held across a send — references are copied out first.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use ftl_core::traits::{ConnectionEvent, ConnectionEventKind, ConnectionResult, NodeConnection};
use ftl_core::types::ConnectionId;
use ftl_protocol::ids::ChannelId;
use ftl_protocol::message::{
    IntroPayload, NodeStatePayload, OutroPayload, PublishPayload, RelayPayload,
    SubscriptionPayload,
};

use crate::store::{StreamEntry, StreamStore, SubscriptionStore};

/// Connections the orchestrator is tracking, split by whether their intro
/// has arrived yet. Pending connections count in no routing decision.
struct ConnectionSets<C> {
    pending: HashMap<ConnectionId, Arc<C>>,
    active: HashMap<ConnectionId, Arc<C>>,
}

/// Fleet-wide coordinator for stream routing
pub struct Orchestrator<C: NodeConnection> {
    connections: Mutex<ConnectionSets<C>>,
    streams: StreamStore<C>,
    subscriptions: SubscriptionStore<C>,
    /// Set during shutdown so new-connection and closed-connection events
    /// short-circuit while the fleet is being torn down
    stopping: AtomicBool,
}

impl<C: NodeConnection> Orchestrator<C> {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(ConnectionSets {
                pending: HashMap::new(),
                active: HashMap::new(),
            }),
            streams: StreamStore::new(),
            subscriptions: SubscriptionStore::new(),
            stopping: AtomicBool::new(false),
        }
    }

    /// Dispatch connection events until the channel closes
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<ConnectionEvent>) {
        while let Some(event) = events.recv().await {
            self.dispatch(event).await;
        }
        tracing::debug!("event channel closed, dispatch loop ending");
    }

    async fn dispatch(&self, event: ConnectionEvent) {
        let ConnectionEvent {
            connection_id,
            kind,
        } = event;
        match kind {
            ConnectionEventKind::Intro { payload, reply } => {
                let _ = reply.send(self.handle_intro(connection_id, payload).await);
            }
            ConnectionEventKind::Outro { payload, reply } => {
                let _ = reply.send(self.handle_outro(connection_id, payload).await);
            }
            ConnectionEventKind::NodeState { payload, reply } => {
                let _ = reply.send(self.handle_node_state(connection_id, payload).await);
            }
            ConnectionEventKind::ChannelSubscription { payload, reply } => {
                let _ = reply.send(
                    self.handle_channel_subscription(connection_id, payload)
                        .await,
                );
            }
            ConnectionEventKind::StreamPublish { payload, reply } => {
                let _ = reply.send(self.handle_stream_publish(connection_id, payload).await);
            }
            ConnectionEventKind::StreamRelay { payload, reply } => {
                let _ = reply.send(self.handle_stream_relay(connection_id, payload).await);
            }
            ConnectionEventKind::Closed => self.handle_closed(connection_id).await,
        }
    }

    fn lookup(&self, connection_id: ConnectionId) -> Option<Arc<C>> {
        let sets = self.connections.lock().unwrap();
        sets.pending
            .get(&connection_id)
            .or_else(|| sets.active.get(&connection_id))
            .cloned()
    }

    fn unknown(&self, connection_id: ConnectionId, request: &str) -> ConnectionResult {
        tracing::error!("{} from unknown connection {}", request, connection_id);
        ConnectionResult::failed()
    }

    /// Track a freshly accepted connection and start it. The connection
    /// stays pending until its intro arrives.
    pub async fn handle_new_connection(&self, connection: Arc<C>) {
        if self.stopping.load(Ordering::SeqCst) {
            connection.stop().await;
            return;
        }

        let connection_id = connection.id();
        tracing::info!("new connection {}, pending intro...", connection_id);
        self.connections
            .lock()
            .unwrap()
            .pending
            .insert(connection_id, Arc::clone(&connection));

        if let Err(e) = connection.start().await {
            tracing::warn!("connection {} failed to start: {}", connection_id, e);
            self.connections
                .lock()
                .unwrap()
                .pending
                .remove(&connection_id);
        }
    }

    pub async fn handle_intro(
        &self,
        connection_id: ConnectionId,
        payload: IntroPayload,
    ) -> ConnectionResult {
        let Some(connection) = self.lookup(connection_id) else {
            return self.unknown(connection_id, "intro");
        };

        connection.set_hostname(&payload.hostname);
        connection.apply_intro(&payload);
        tracing::info!(
            "intro from {}: host '{}', v{}.{}.{}, layer {}, region '{}'",
            connection_id,
            payload.hostname,
            payload.version_major,
            payload.version_minor,
            payload.version_revision,
            payload.relay_layer,
            payload.region_code,
        );

        let mut sets = self.connections.lock().unwrap();
        if let Some(connection) = sets.pending.remove(&connection_id) {
            sets.active.insert(connection_id, connection);
        }
        ConnectionResult::ok()
    }

    pub async fn handle_outro(
        &self,
        connection_id: ConnectionId,
        payload: OutroPayload,
    ) -> ConnectionResult {
        let Some(connection) = self.lookup(connection_id) else {
            return self.unknown(connection_id, "outro");
        };
        // Teardown happens when the connection actually closes
        tracing::info!("outro from {}: '{}'", connection.hostname(), payload.reason);
        ConnectionResult::ok()
    }

    pub async fn handle_node_state(
        &self,
        connection_id: ConnectionId,
        payload: NodeStatePayload,
    ) -> ConnectionResult {
        let Some(connection) = self.lookup(connection_id) else {
            return self.unknown(connection_id, "node state");
        };
        connection.apply_node_state(&payload);
        tracing::info!(
            "node state from {}: load {} / {}",
            connection.hostname(),
            payload.current_load,
            payload.maximum_load,
        );
        ConnectionResult::ok()
    }

    pub async fn handle_channel_subscription(
        &self,
        connection_id: ConnectionId,
        payload: SubscriptionPayload,
    ) -> ConnectionResult {
        let Some(connection) = self.lookup(connection_id) else {
            return self.unknown(connection_id, "channel subscription");
        };

        if payload.is_subscribe {
            tracing::info!(
                "subscribe from {}: channel {}",
                connection.hostname(),
                payload.channel_id
            );
            self.subscriptions.add(
                Arc::clone(&connection),
                payload.channel_id,
                payload.stream_key.clone(),
            );

            // A stream may already be live on this channel
            if let Some(stream) = self.streams.get_by_channel(payload.channel_id) {
                self.open_route(&stream, &connection, payload.stream_key)
                    .await;
            }
            ConnectionResult::ok()
        } else {
            tracing::info!(
                "unsubscribe from {}: channel {}",
                connection.hostname(),
                payload.channel_id
            );
            if let Some(stream) = self.streams.get_by_channel(payload.channel_id) {
                self.close_route(&stream, &connection).await;
            }
            let removed = self.subscriptions.remove(connection_id, payload.channel_id);
            ConnectionResult { success: removed }
        }
    }

    pub async fn handle_stream_publish(
        &self,
        connection_id: ConnectionId,
        payload: PublishPayload,
    ) -> ConnectionResult {
        let Some(connection) = self.lookup(connection_id) else {
            return self.unknown(connection_id, "stream publish");
        };

        if payload.is_publish {
            tracing::info!(
                "publish from {}: channel {}, stream {}",
                connection.hostname(),
                payload.channel_id,
                payload.stream_id,
            );
            let stream = StreamEntry {
                origin: Arc::clone(&connection),
                channel_id: payload.channel_id,
                stream_id: payload.stream_id,
            };
            if let Err(e) = self.streams.add(stream.clone()) {
                tracing::error!(
                    "rejecting publish from {}: {}",
                    connection.hostname(),
                    e
                );
                return ConnectionResult::failed();
            }

            // Open relays to everyone already waiting on this channel
            for subscription in self
                .subscriptions
                .subscriptions_for_channel(payload.channel_id)
            {
                self.open_route(&stream, &subscription.connection, subscription.stream_key)
                    .await;
            }
            ConnectionResult::ok()
        } else {
            tracing::info!(
                "unpublish from {}: channel {}, stream {}",
                connection.hostname(),
                payload.channel_id,
                payload.stream_id,
            );
            if self
                .streams
                .remove(payload.channel_id, payload.stream_id)
                .is_none()
            {
                tracing::warn!(
                    "{} unpublished channel {} / stream {}, but no such stream is registered",
                    connection.hostname(),
                    payload.channel_id,
                    payload.stream_id,
                );
            }
            ConnectionResult::ok()
        }
    }

    pub async fn handle_stream_relay(
        &self,
        connection_id: ConnectionId,
        payload: RelayPayload,
    ) -> ConnectionResult {
        let Some(connection) = self.lookup(connection_id) else {
            return self.unknown(connection_id, "stream relay");
        };
        // Relay instructions flow from the orchestrator outward; an inbound
        // one carries no state the routing core tracks. Acknowledge it.
        tracing::debug!(
            "stream relay notice from {}: channel {}, stream {}, start={}",
            connection.hostname(),
            payload.channel_id,
            payload.stream_id,
            payload.is_start_relay,
        );
        ConnectionResult::ok()
    }

    pub async fn handle_closed(&self, connection_id: ConnectionId) {
        // Shutdown is already clearing everything out
        if self.stopping.load(Ordering::SeqCst) {
            return;
        }
        let Some(connection) = self.lookup(connection_id) else {
            return;
        };
        tracing::info!("connection closed to {}", connection.hostname());

        // Stop any relays feeding this connection. Streams this connection
        // originated disappear with it — their relays have nothing left to
        // forward, so no stop instructions are sent for those.
        for subscription in self.subscriptions.subscriptions_for_connection(connection_id) {
            if let Some(stream) = self.streams.get_by_channel(subscription.channel_id) {
                self.close_route(&stream, &connection).await;
            }
        }

        if let Err(e) = self.streams.remove_all_for_connection(connection_id) {
            tracing::error!(
                "stream store inconsistency while removing {}: {}",
                connection.hostname(),
                e
            );
        }
        self.subscriptions.clear_for(connection_id);

        let mut sets = self.connections.lock().unwrap();
        sets.pending.remove(&connection_id);
        sets.active.remove(&connection_id);
    }

    /// Instruct a stream's origin to begin relaying to a subscriber.
    ///
    /// Routes are direct origin-to-subscriber for now; a relay tier would
    /// be planned here.
    async fn open_route(&self, stream: &StreamEntry<C>, subscriber: &Arc<C>, stream_key: Bytes) {
        let payload = RelayPayload {
            is_start_relay: true,
            channel_id: stream.channel_id,
            stream_id: stream.stream_id,
            target_hostname: subscriber.hostname(),
            stream_key,
        };
        if let Err(e) = stream.origin.send_stream_relay(payload).await {
            tracing::warn!(
                "failed to send relay start to {}: {}",
                stream.origin.hostname(),
                e
            );
        }
    }

    /// Instruct a stream's origin to stop relaying to a subscriber
    async fn close_route(&self, stream: &StreamEntry<C>, subscriber: &Arc<C>) {
        let payload = RelayPayload {
            is_start_relay: false,
            channel_id: stream.channel_id,
            stream_id: stream.stream_id,
            target_hostname: subscriber.hostname(),
            stream_key: Bytes::new(),
        };
        if let Err(e) = stream.origin.send_stream_relay(payload).await {
            tracing::warn!(
                "failed to send relay stop to {}: {}",
                stream.origin.hostname(),
                e
            );
        }
    }

    /// Shut the fleet down: stop every connection, then clear all state.
    /// Connections are snapshotted outside the lock so a connection racing
    /// to remove itself cannot deadlock against us.
    pub async fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);

        let connections: Vec<Arc<C>> = {
            let sets = self.connections.lock().unwrap();
            sets.pending
                .values()
                .chain(sets.active.values())
                .cloned()
                .collect()
        };
        for connection in &connections {
            connection.stop().await;
        }

        let mut sets = self.connections.lock().unwrap();
        sets.pending.clear();
        sets.active.clear();
        drop(sets);

        self.streams.clear();
        self.subscriptions.clear();
    }

    /// Channels a connection is currently subscribed to
    pub fn subscribed_channels(&self, connection_id: ConnectionId) -> Vec<ChannelId> {
        self.subscriptions
            .subscriptions_for_connection(connection_id)
            .into_iter()
            .map(|s| s.channel_id)
            .collect()
    }

    /// Number of connections still awaiting their intro
    pub fn pending_count(&self) -> usize {
        self.connections.lock().unwrap().pending.len()
    }

    /// Number of introduced connections
    pub fn active_count(&self) -> usize {
        self.connections.lock().unwrap().active.len()
    }
}

impl<C: NodeConnection> Default for Orchestrator<C> {
    fn default() -> Self {
        Self::new()
    }
}
