//! ftl-client: Outbound connector for FTL nodes
//!
//! Lets an ingest, edge, or relay node dial the orchestration service,
//! introduce itself, and exchange protocol messages. Relay instructions
//! arriving from the orchestrator surface as connection events; nodes must
//! drain them (and reply) to keep their inbound pipeline moving.

use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use ftl_core::traits::{ConnectionEvent, NodeConnection};
use ftl_orchestrator::connection::FtlConnection;
use ftl_orchestrator::transport::{TlsRole, TlsTransport};
use ftl_protocol::ids::{ChannelId, StreamId};
use ftl_protocol::message::{
    IntroPayload, NodeStatePayload, OutroPayload, PublishPayload, SubscriptionPayload,
};

/// Default orchestration service port
pub const DEFAULT_PORT: u16 = 8085;

/// Capacity for events flowing from the connection to the node
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A node's connection to the orchestration service
pub struct OrchestrationClient {
    connection: Arc<FtlConnection<TlsTransport>>,
    events: mpsc::Receiver<ConnectionEvent>,
}

impl OrchestrationClient {
    /// Dial the orchestrator and complete the TLS-PSK handshake.
    /// `hostname` is this node's own name, announced in its intro.
    pub async fn connect(
        host: &str,
        port: u16,
        pre_shared_key: Vec<u8>,
        hostname: impl Into<String>,
    ) -> Result<Self> {
        let stream = TcpStream::connect((host, port))
            .await
            .with_context(|| format!("could not connect to orchestration service at {}:{}", host, port))?;
        let transport = TlsTransport::new(TlsRole::Client, stream, pre_shared_key);
        let (event_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let connection = FtlConnection::with_hostname(transport, event_tx, hostname.into());
        connection
            .start()
            .await
            .context("TLS handshake with the orchestrator failed")?;
        tracing::info!("connected to orchestration service at {}:{}", host, port);
        Ok(Self { connection, events })
    }

    /// The underlying connection, for direct sends
    pub fn connection(&self) -> &Arc<FtlConnection<TlsTransport>> {
        &self.connection
    }

    /// Next event from the orchestrator; `None` once the connection closes
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        self.events.recv().await
    }

    /// Announce this node
    pub async fn intro(
        &self,
        version: (u8, u8, u8),
        relay_layer: u8,
        region_code: &str,
    ) -> Result<()> {
        self.connection
            .send_intro(IntroPayload {
                version_major: version.0,
                version_minor: version.1,
                version_revision: version.2,
                relay_layer,
                region_code: region_code.to_string(),
                hostname: self.connection.hostname(),
            })
            .await?;
        Ok(())
    }

    /// Announce departure
    pub async fn outro(&self, reason: &str) -> Result<()> {
        self.connection
            .send_outro(OutroPayload {
                reason: reason.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Report current load
    pub async fn node_state(&self, current_load: u32, maximum_load: u32) -> Result<()> {
        self.connection
            .send_node_state(NodeStatePayload {
                current_load,
                maximum_load,
            })
            .await?;
        Ok(())
    }

    /// Subscribe to a channel's streams
    pub async fn subscribe(&self, channel_id: ChannelId, stream_key: Bytes) -> Result<()> {
        self.connection
            .send_channel_subscription(SubscriptionPayload {
                is_subscribe: true,
                channel_id,
                stream_key,
            })
            .await?;
        Ok(())
    }

    /// Drop a channel subscription
    pub async fn unsubscribe(&self, channel_id: ChannelId) -> Result<()> {
        self.connection
            .send_channel_subscription(SubscriptionPayload {
                is_subscribe: false,
                channel_id,
                stream_key: Bytes::new(),
            })
            .await?;
        Ok(())
    }

    /// Announce a live stream on a channel this node hosts
    pub async fn publish(&self, channel_id: ChannelId, stream_id: StreamId) -> Result<()> {
        self.connection
            .send_stream_publish(PublishPayload {
                is_publish: true,
                channel_id,
                stream_id,
            })
            .await?;
        Ok(())
    }

    /// Announce the end of a stream
    pub async fn unpublish(&self, channel_id: ChannelId, stream_id: StreamId) -> Result<()> {
        self.connection
            .send_stream_publish(PublishPayload {
                is_publish: false,
                channel_id,
                stream_id,
            })
            .await?;
        Ok(())
    }

    /// Close the connection and wait for teardown
    pub async fn close(&self) {
        self.connection.stop().await;
    }
}
