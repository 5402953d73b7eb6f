//! TLS 1.3 PSK transport
//!
//! One transport instance per peer. `start()` runs the handshake and then
//! spawns a single I/O task that multiplexes reads from the TLS stream and
//! writes from a bounded outbound queue. The closed signal fires exactly
//! once, whether shutdown was local, remote, or a TLS failure.
//!
//! Authentication is pre-shared-key only: TLS 1.3, ciphersuite pinned to
//! `TLS_AES_128_GCM_SHA256`, client identity `"orchestrator"`.

use std::pin::Pin;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use openssl::error::ErrorStack;
use openssl::ssl::{Ssl, SslContext, SslContextBuilder, SslMethod, SslVersion};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_openssl::SslStream;
use tokio_util::sync::CancellationToken;

use ftl_core::error::TransportError;
use ftl_core::traits::Transport;

/// Identity string clients present during the PSK exchange
pub const PSK_IDENTITY: &str = "orchestrator";

/// The only ciphersuite this deployment negotiates
const CIPHERSUITES: &str = "TLS_AES_128_GCM_SHA256";

/// Bound on queued chunks in each direction, per connection
const CHANNEL_CAPACITY: usize = 64;

const READ_BUFFER_SIZE: usize = 4096;

/// Which side of the handshake this transport plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsRole {
    Server,
    Client,
}

/// A TLS-PSK secured byte stream over one TCP socket
pub struct TlsTransport {
    role: TlsRole,
    pre_shared_key: Vec<u8>,
    /// Socket waiting for `start()`; taken exactly once
    tcp: Mutex<Option<TcpStream>>,
    /// Handed to the I/O task at start so the inbound channel closes (and
    /// readers see EOF) when that task ends
    inbound_tx: Mutex<Option<mpsc::Sender<Bytes>>>,
    inbound_rx: tokio::sync::Mutex<mpsc::Receiver<Bytes>>,
    outbound_tx: mpsc::Sender<Bytes>,
    outbound_rx: Mutex<Option<mpsc::Receiver<Bytes>>>,
    cancel: CancellationToken,
    closed: CancellationToken,
}

impl TlsTransport {
    /// Wrap an established TCP stream. The TLS handshake runs in `start()`.
    pub fn new(role: TlsRole, stream: TcpStream, pre_shared_key: Vec<u8>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        Self {
            role,
            pre_shared_key,
            tcp: Mutex::new(Some(stream)),
            inbound_tx: Mutex::new(Some(inbound_tx)),
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            cancel: CancellationToken::new(),
            closed: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl Transport for TlsTransport {
    async fn start(&self) -> Result<(), TransportError> {
        let tcp = self
            .tcp
            .lock()
            .unwrap()
            .take()
            .ok_or(TransportError::AlreadyStarted)?;
        let outbound_rx = self
            .outbound_rx
            .lock()
            .unwrap()
            .take()
            .ok_or(TransportError::AlreadyStarted)?;
        let inbound_tx = self
            .inbound_tx
            .lock()
            .unwrap()
            .take()
            .ok_or(TransportError::AlreadyStarted)?;

        let context = match self.role {
            TlsRole::Server => server_context(&self.pre_shared_key),
            TlsRole::Client => client_context(&self.pre_shared_key),
        }
        .map_err(|e| TransportError::Tls(e.to_string()))?;

        let ssl = Ssl::new(&context).map_err(|e| TransportError::Tls(e.to_string()))?;
        let mut stream =
            SslStream::new(ssl, tcp).map_err(|e| TransportError::Tls(e.to_string()))?;

        let handshake = async {
            match self.role {
                TlsRole::Server => Pin::new(&mut stream).accept().await,
                TlsRole::Client => Pin::new(&mut stream).connect().await,
            }
        };
        let result = tokio::select! {
            result = handshake => result,
            _ = self.cancel.cancelled() => {
                self.closed.cancel();
                return Err(TransportError::Closed);
            }
        };
        if let Err(e) = result {
            tracing::warn!("TLS handshake failed: {}", e);
            self.closed.cancel();
            return Err(TransportError::Handshake(e.to_string()));
        }
        tracing::debug!(role = ?self.role, "TLS handshake complete");

        tokio::spawn(io_loop(
            stream,
            inbound_tx,
            outbound_rx,
            self.cancel.clone(),
            self.closed.clone(),
        ));
        Ok(())
    }

    async fn read(&self) -> Option<Bytes> {
        let mut inbound = self.inbound_rx.lock().await;
        // Drain buffered chunks before reporting EOF; the closed arm only
        // matters when the transport was stopped before it ever started.
        tokio::select! {
            biased;
            chunk = inbound.recv() => chunk,
            _ = self.closed.cancelled() => None,
        }
    }

    async fn write(&self, bytes: Bytes) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() || self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.outbound_tx
            .send(bytes)
            .await
            .map_err(|_| TransportError::Closed)
    }

    fn stop(&self) {
        self.cancel.cancel();
        // If the transport never started there is no I/O task to fire the
        // closed signal, so fire it here.
        if self.tcp.lock().unwrap().take().is_some() {
            self.closed.cancel();
        }
    }

    async fn closed(&self) {
        self.closed.cancelled().await
    }
}

/// Single I/O task per connection: TLS reads, queued writes, shutdown.
async fn io_loop(
    stream: SslStream<TcpStream>,
    inbound: mpsc::Sender<Bytes>,
    mut outbound: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
    closed: CancellationToken,
) {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    tracing::debug!("peer closed the TLS stream");
                    break;
                }
                Ok(n) => {
                    if inbound.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("TLS read failed, terminating this connection: {}", e);
                    break;
                }
            },
            chunk = outbound.recv() => match chunk {
                Some(bytes) => {
                    if let Err(e) = writer.write_all(&bytes).await {
                        tracing::warn!("TLS write failed, terminating this connection: {}", e);
                        break;
                    }
                }
                None => break,
            },
            _ = cancel.cancelled() => break,
        }
    }

    // Best-effort close_notify; the peer may already be gone.
    let mut stream = reader.unsplit(writer);
    let _ = stream.shutdown().await;
    closed.cancel();
}

fn configure(builder: &mut SslContextBuilder) -> Result<(), ErrorStack> {
    builder.set_min_proto_version(Some(SslVersion::TLS1_3))?;
    builder.set_max_proto_version(Some(SslVersion::TLS1_3))?;
    builder.set_ciphersuites(CIPHERSUITES)?;
    Ok(())
}

fn server_context(pre_shared_key: &[u8]) -> Result<SslContext, ErrorStack> {
    let mut builder = SslContextBuilder::new(SslMethod::tls_server())?;
    configure(&mut builder)?;
    let key = pre_shared_key.to_vec();
    builder.set_psk_server_callback(move |_ssl, identity, secret| {
        match identity {
            Some(id) if id == PSK_IDENTITY.as_bytes() => {}
            other => {
                tracing::warn!(identity = ?other, "rejecting PSK exchange with unexpected identity");
                return Ok(0);
            }
        }
        if secret.len() < key.len() {
            return Ok(0);
        }
        secret[..key.len()].copy_from_slice(&key);
        Ok(key.len())
    });
    Ok(builder.build())
}

fn client_context(pre_shared_key: &[u8]) -> Result<SslContext, ErrorStack> {
    let mut builder = SslContextBuilder::new(SslMethod::tls_client())?;
    configure(&mut builder)?;
    let key = pre_shared_key.to_vec();
    builder.set_psk_client_callback(move |_ssl, _hint, identity, secret| {
        // The identity buffer expects a C string
        let ident = PSK_IDENTITY.as_bytes();
        if identity.len() < ident.len() + 1 || secret.len() < key.len() {
            return Ok(0);
        }
        identity[..ident.len()].copy_from_slice(ident);
        identity[ident.len()] = 0;
        secret[..key.len()].copy_from_slice(&key);
        Ok(key.len())
    });
    Ok(builder.build())
}
