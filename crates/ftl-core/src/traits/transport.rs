//! Transport capability
//!
//! A transport owns one framed byte stream to a single peer. Implementations
//! run their own I/O task; the connection layer only sees chunks of bytes.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportError;

/// One secured byte stream to a peer
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Bring the transport up. Returns only once the handshake has
    /// completed, successfully or not; a failed handshake also fires the
    /// closed signal.
    async fn start(&self) -> Result<(), TransportError>;

    /// Receive the next chunk of inbound bytes. Returns `None` once the
    /// transport has closed. Chunk boundaries carry no meaning; callers
    /// must reassemble frames themselves.
    async fn read(&self) -> Option<Bytes>;

    /// Queue bytes for transmission. Does not wait for the peer; fails
    /// once the transport is closed.
    async fn write(&self, bytes: Bytes) -> Result<(), TransportError>;

    /// Begin bidirectional shutdown. Idempotent; the closed signal fires
    /// exactly once no matter how many times this is called or whether the
    /// peer closed first.
    fn stop(&self);

    /// Wait until the transport has fully closed
    async fn closed(&self);
}
