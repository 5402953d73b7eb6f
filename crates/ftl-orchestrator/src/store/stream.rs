//! Stream store
//!
//! Live streams indexed two ways: by channel (at most one stream per
//! channel) and by origin connection (all streams a node is hosting). Both
//! indices live behind one mutex so they can never be observed disagreeing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ftl_core::traits::NodeConnection;
use ftl_core::types::ConnectionId;
use ftl_protocol::ids::{ChannelId, StreamId};

use super::StoreError;

/// One live stream and the connection hosting it
pub struct StreamEntry<C> {
    /// The ingest connection originating this stream
    pub origin: Arc<C>,
    pub channel_id: ChannelId,
    pub stream_id: StreamId,
}

impl<C> Clone for StreamEntry<C> {
    fn clone(&self) -> Self {
        Self {
            origin: Arc::clone(&self.origin),
            channel_id: self.channel_id,
            stream_id: self.stream_id,
        }
    }
}

struct Indices<C> {
    by_channel: HashMap<ChannelId, StreamEntry<C>>,
    by_origin: HashMap<ConnectionId, Vec<StreamEntry<C>>>,
}

/// Manages storage and retrieval of live streams
pub struct StreamStore<C> {
    inner: Mutex<Indices<C>>,
}

impl<C: NodeConnection> StreamStore<C> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Indices {
                by_channel: HashMap::new(),
                by_origin: HashMap::new(),
            }),
        }
    }

    /// Add a stream. Rejects a second stream on the same channel.
    pub fn add(&self, stream: StreamEntry<C>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.by_channel.contains_key(&stream.channel_id) {
            return Err(StoreError::DuplicateChannel(stream.channel_id));
        }
        inner
            .by_origin
            .entry(stream.origin.id())
            .or_default()
            .push(stream.clone());
        inner.by_channel.insert(stream.channel_id, stream);
        Ok(())
    }

    /// Remove the stream with the given ids, pruning both indices.
    /// Returns the removed stream, or `None` if no such stream exists.
    pub fn remove(&self, channel_id: ChannelId, stream_id: StreamId) -> Option<StreamEntry<C>> {
        let mut inner = self.inner.lock().unwrap();
        match inner.by_channel.get(&channel_id) {
            Some(entry) if entry.stream_id == stream_id => {}
            _ => return None,
        }
        let entry = inner.by_channel.remove(&channel_id)?;

        let origin_id = entry.origin.id();
        match inner.by_origin.get_mut(&origin_id) {
            Some(streams) => {
                streams.retain(|s| !(s.channel_id == channel_id && s.stream_id == stream_id));
                if streams.is_empty() {
                    inner.by_origin.remove(&origin_id);
                }
            }
            None => {
                tracing::error!(
                    "stream store inconsistency: no origin entry for channel {} / stream {}",
                    channel_id,
                    stream_id
                );
            }
        }
        Some(entry)
    }

    /// Get the live stream on a channel, if any
    pub fn get_by_channel(&self, channel_id: ChannelId) -> Option<StreamEntry<C>> {
        self.inner.lock().unwrap().by_channel.get(&channel_id).cloned()
    }

    /// Remove every stream hosted by a connection, consistency-checking the
    /// reverse index. Returns the removed streams.
    pub fn remove_all_for_connection(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Vec<StreamEntry<C>>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(streams) = inner.by_origin.remove(&connection_id) else {
            return Ok(Vec::new());
        };
        for stream in &streams {
            if inner.by_channel.remove(&stream.channel_id).is_none() {
                return Err(StoreError::Inconsistent(
                    "no channel entry for a stream listed under its origin",
                ));
            }
        }
        Ok(streams)
    }

    /// Wipe both indices
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.by_channel.clear();
        inner.by_origin.clear();
    }

    /// Number of live streams
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().by_channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<C: NodeConnection> Default for StreamStore<C> {
    fn default() -> Self {
        Self::new()
    }
}
