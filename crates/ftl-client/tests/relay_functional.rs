//! Functional tests over real TLS loopback connections
//!
//! A full orchestrator (listener, TLS-PSK transports, dispatch loop) runs
//! on an ephemeral port; ingest and edge nodes connect through
//! `OrchestrationClient` exactly as production nodes would.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use ftl_client::OrchestrationClient;
use ftl_core::traits::{ConnectionEventKind, ConnectionResult};
use ftl_orchestrator::connection::FtlConnection;
use ftl_orchestrator::server::OrchestrationListener;
use ftl_orchestrator::transport::TlsTransport;
use ftl_orchestrator::Orchestrator;
use ftl_protocol::ids::{ChannelId, StreamId};
use ftl_protocol::message::RelayPayload;

fn test_key() -> Vec<u8> {
    (0x00..=0x1f).collect()
}

/// Running orchestrator on an ephemeral loopback port
struct TestServer {
    port: u16,
    cancel: CancellationToken,
}

impl TestServer {
    async fn start() -> Self {
        let (event_tx, event_rx) = mpsc::channel(64);
        let orchestrator = Arc::new(Orchestrator::<FtlConnection<TlsTransport>>::new());
        tokio::spawn(Arc::clone(&orchestrator).run(event_rx));

        let cancel = CancellationToken::new();
        let listener = OrchestrationListener::bind(
            SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            test_key(),
            event_tx,
            cancel.clone(),
        )
        .expect("failed to bind test listener");
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let _ = listener.serve(orchestrator).await;
        });

        Self { port, cancel }
    }

    async fn connect(&self, hostname: &str) -> OrchestrationClient {
        let client = OrchestrationClient::connect("127.0.0.1", self.port, test_key(), hostname)
            .await
            .expect("client failed to connect");
        client.intro((0, 1, 0), 0, "test").await.unwrap();
        client
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Wait for the next relay instruction to arrive at a node, acknowledging
/// it so the connection's pipeline keeps moving
async fn next_relay(client: &mut OrchestrationClient) -> RelayPayload {
    loop {
        let event = timeout(Duration::from_secs(10), client.next_event())
            .await
            .expect("timed out waiting for a relay instruction")
            .expect("connection closed while waiting for a relay instruction");
        match event.kind {
            ConnectionEventKind::StreamRelay { payload, reply } => {
                let _ = reply.send(ConnectionResult::ok());
                return payload;
            }
            _ => continue,
        }
    }
}

#[tokio::test]
async fn test_ingest_to_edge_relay_over_tls() {
    let server = TestServer::start().await;
    let mut ingest = server.connect("ingest-1").await;
    let edge = server.connect("edge-1").await;

    let stream_key = Bytes::from_static(&[0x0f, 0x0e, 0x00, 0x01]);
    edge.subscribe(ChannelId::new(1234), stream_key.clone())
        .await
        .unwrap();
    // Let the subscription land before the publish races it
    sleep(Duration::from_millis(200)).await;

    ingest
        .publish(ChannelId::new(1234), StreamId::new(5678))
        .await
        .unwrap();

    let relay = next_relay(&mut ingest).await;
    assert!(relay.is_start_relay);
    assert_eq!(relay.channel_id, ChannelId::new(1234));
    assert_eq!(relay.stream_id, StreamId::new(5678));
    assert_eq!(relay.target_hostname, "edge-1");
    assert_eq!(relay.stream_key, stream_key);

    edge.unsubscribe(ChannelId::new(1234)).await.unwrap();

    let relay = next_relay(&mut ingest).await;
    assert!(!relay.is_start_relay);
    assert_eq!(relay.channel_id, ChannelId::new(1234));
    assert_eq!(relay.target_hostname, "edge-1");
    assert!(relay.stream_key.is_empty());
}

#[tokio::test]
async fn test_edge_disconnect_stops_relay_over_tls() {
    let server = TestServer::start().await;
    let mut ingest = server.connect("ingest-1").await;
    let edge = server.connect("edge-1").await;

    edge.subscribe(ChannelId::new(42), Bytes::from_static(b"key"))
        .await
        .unwrap();
    sleep(Duration::from_millis(200)).await;

    ingest
        .publish(ChannelId::new(42), StreamId::new(7))
        .await
        .unwrap();
    assert!(next_relay(&mut ingest).await.is_start_relay);

    // The edge drops its connection instead of unsubscribing
    edge.close().await;

    let relay = next_relay(&mut ingest).await;
    assert!(!relay.is_start_relay);
    assert_eq!(relay.channel_id, ChannelId::new(42));
    assert_eq!(relay.target_hostname, "edge-1");
}

#[tokio::test]
async fn test_outro_then_disconnect_is_clean() {
    let server = TestServer::start().await;
    let mut edge = server.connect("edge-1").await;

    edge.subscribe(ChannelId::new(9), Bytes::from_static(b"key"))
        .await
        .unwrap();
    edge.outro("sign-off").await.unwrap();
    edge.close().await;

    // The connection's event stream terminates with its closed event
    let saw_closed = timeout(Duration::from_secs(10), async {
        while let Some(event) = edge.next_event().await {
            if matches!(event.kind, ConnectionEventKind::Closed) {
                return true;
            }
        }
        false
    })
    .await
    .expect("timed out waiting for teardown");
    assert!(saw_closed);
}
