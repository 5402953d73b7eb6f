//! Subscription store
//!
//! Channel subscriptions indexed by subscriber connection and by channel.
//! At most one subscription exists per (connection, channel) pair; a
//! repeated subscribe replaces the stream key rather than stacking a
//! duplicate record.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use ftl_core::traits::NodeConnection;
use ftl_core::types::ConnectionId;
use ftl_protocol::ids::ChannelId;

/// One connection's interest in a channel
pub struct ChannelSubscription<C> {
    /// The subscribing edge or relay connection
    pub connection: Arc<C>,
    pub channel_id: ChannelId,
    /// Token the origin presents when forwarding media to the subscriber
    pub stream_key: Bytes,
}

impl<C> Clone for ChannelSubscription<C> {
    fn clone(&self) -> Self {
        Self {
            connection: Arc::clone(&self.connection),
            channel_id: self.channel_id,
            stream_key: self.stream_key.clone(),
        }
    }
}

struct Indices<C> {
    by_connection: HashMap<ConnectionId, Vec<ChannelSubscription<C>>>,
    by_channel: HashMap<ChannelId, Vec<ChannelSubscription<C>>>,
}

/// Manages subscriptions made by connections to specific channels
pub struct SubscriptionStore<C> {
    inner: Mutex<Indices<C>>,
}

impl<C: NodeConnection> SubscriptionStore<C> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Indices {
                by_connection: HashMap::new(),
                by_channel: HashMap::new(),
            }),
        }
    }

    /// Add a subscription. Idempotent on (connection, channel): a repeated
    /// subscribe replaces any prior stream key.
    pub fn add(&self, connection: Arc<C>, channel_id: ChannelId, stream_key: Bytes) {
        let connection_id = connection.id();
        let subscription = ChannelSubscription {
            connection,
            channel_id,
            stream_key,
        };

        let mut inner = self.inner.lock().unwrap();
        let by_connection = inner.by_connection.entry(connection_id).or_default();
        by_connection.retain(|s| s.channel_id != channel_id);
        by_connection.push(subscription.clone());

        let by_channel = inner.by_channel.entry(channel_id).or_default();
        by_channel.retain(|s| s.connection.id() != connection_id);
        by_channel.push(subscription);
    }

    /// Remove the subscription for (connection, channel). Returns whether a
    /// subscription existed in both indices.
    pub fn remove(&self, connection_id: ConnectionId, channel_id: ChannelId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let mut success = true;

        match inner.by_connection.get_mut(&connection_id) {
            Some(subs) => {
                let before = subs.len();
                subs.retain(|s| s.channel_id != channel_id);
                if subs.len() == before {
                    tracing::error!(
                        "attempt to remove non-existent subscription for {} to channel {}",
                        connection_id,
                        channel_id
                    );
                    success = false;
                }
                if subs.is_empty() {
                    inner.by_connection.remove(&connection_id);
                }
            }
            None => {
                tracing::error!(
                    "attempt to remove a subscription for {}, but none exist",
                    connection_id
                );
                success = false;
            }
        }

        match inner.by_channel.get_mut(&channel_id) {
            Some(subs) => {
                let before = subs.len();
                subs.retain(|s| s.connection.id() != connection_id);
                if subs.len() == before {
                    tracing::error!(
                        "attempt to remove non-existent subscription on channel {} for {}",
                        channel_id,
                        connection_id
                    );
                    success = false;
                }
                if subs.is_empty() {
                    inner.by_channel.remove(&channel_id);
                }
            }
            None => {
                tracing::error!(
                    "attempt to remove a subscription on channel {}, but none exist",
                    channel_id
                );
                success = false;
            }
        }
        success
    }

    /// Snapshot of one connection's subscriptions
    pub fn subscriptions_for_connection(
        &self,
        connection_id: ConnectionId,
    ) -> Vec<ChannelSubscription<C>> {
        self.inner
            .lock()
            .unwrap()
            .by_connection
            .get(&connection_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of the subscriptions on one channel
    pub fn subscriptions_for_channel(&self, channel_id: ChannelId) -> Vec<ChannelSubscription<C>> {
        self.inner
            .lock()
            .unwrap()
            .by_channel
            .get(&channel_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop all subscriptions held by a connection
    pub fn clear_for(&self, connection_id: ConnectionId) {
        let mut inner = self.inner.lock().unwrap();
        let Some(subs) = inner.by_connection.remove(&connection_id) else {
            return;
        };
        for subscription in subs {
            match inner.by_channel.get_mut(&subscription.channel_id) {
                Some(channel_subs) => {
                    channel_subs.retain(|s| s.connection.id() != connection_id);
                    if channel_subs.is_empty() {
                        inner.by_channel.remove(&subscription.channel_id);
                    }
                }
                None => {
                    tracing::error!(
                        "subscription store inconsistency: no channel entry for {} on channel {}",
                        connection_id,
                        subscription.channel_id
                    );
                }
            }
        }
    }

    /// Drop everything
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.by_connection.clear();
        inner.by_channel.clear();
    }

    /// Total number of subscriptions
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .by_connection
            .values()
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<C: NodeConnection> Default for SubscriptionStore<C> {
    fn default() -> Self {
        Self::new()
    }
}
