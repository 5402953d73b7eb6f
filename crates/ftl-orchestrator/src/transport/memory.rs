//! In-memory transport for tests
//!
//! A `DuplexTransport` pair moves bytes between two endpoints through
//! channels, preserving chunk boundaries exactly as written. Tests use it
//! to drip bytes into a connection one at a time or to stand in for a TLS
//! link without sockets.

use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ftl_core::error::TransportError;
use ftl_core::traits::Transport;

const CHANNEL_CAPACITY: usize = 64;

/// One end of an in-memory byte pipe
pub struct DuplexTransport {
    /// Sender towards the peer; dropped on stop so the peer sees EOF
    outbound: Mutex<Option<mpsc::Sender<Bytes>>>,
    inbound: tokio::sync::Mutex<mpsc::Receiver<Bytes>>,
    closed: CancellationToken,
}

impl DuplexTransport {
    /// Create a connected pair of transports
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (b_tx, b_rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            Self {
                outbound: Mutex::new(Some(a_tx)),
                inbound: tokio::sync::Mutex::new(b_rx),
                closed: CancellationToken::new(),
            },
            Self {
                outbound: Mutex::new(Some(b_tx)),
                inbound: tokio::sync::Mutex::new(a_rx),
                closed: CancellationToken::new(),
            },
        )
    }
}

#[async_trait]
impl Transport for DuplexTransport {
    async fn start(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn read(&self) -> Option<Bytes> {
        let mut inbound = self.inbound.lock().await;
        let chunk = tokio::select! {
            chunk = inbound.recv() => chunk,
            _ = self.closed.cancelled() => None,
        };
        if chunk.is_none() {
            self.closed.cancel();
        }
        chunk
    }

    async fn write(&self, bytes: Bytes) -> Result<(), TransportError> {
        let sender = self.outbound.lock().unwrap().clone();
        match sender {
            Some(sender) => sender
                .send(bytes)
                .await
                .map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    fn stop(&self) {
        self.outbound.lock().unwrap().take();
        self.closed.cancel();
    }

    async fn closed(&self) {
        self.closed.cancelled().await
    }
}
