//! Accept loop
//!
//! Binds the orchestration port, accepts connections, and hands each one —
//! wrapped in a server-role TLS transport and a connection actor — to the
//! orchestrator. Shutdown arrives through a cancellation token; any other
//! accept failure is fatal.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ftl_core::traits::ConnectionEvent;

use crate::connection::FtlConnection;
use crate::orchestrator::Orchestrator;
use crate::transport::{TlsRole, TlsTransport};

const LISTEN_BACKLOG: u32 = 64;

/// TCP server accepting orchestration connections
pub struct OrchestrationListener {
    listener: TcpListener,
    pre_shared_key: Vec<u8>,
    events: mpsc::Sender<ConnectionEvent>,
    cancel: CancellationToken,
}

impl OrchestrationListener {
    /// Bind the listen socket. Port 0 binds an ephemeral port; use
    /// `local_addr` to discover it.
    pub fn bind(
        addr: SocketAddr,
        pre_shared_key: Vec<u8>,
        events: mpsc::Sender<ConnectionEvent>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .context("failed to create listen socket")?;
        socket
            .set_reuseaddr(true)
            .context("failed to set SO_REUSEADDR")?;
        socket
            .bind(addr)
            .with_context(|| format!("failed to bind to {}", addr))?;
        let listener = socket
            .listen(LISTEN_BACKLOG)
            .context("failed to listen on socket")?;

        tracing::info!("listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            pre_shared_key,
            events,
            cancel,
        })
    }

    /// The bound address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until cancelled. Accept errors other than
    /// shutdown are fatal and propagate to the caller.
    pub async fn serve(
        &self,
        orchestrator: Arc<Orchestrator<FtlConnection<TlsTransport>>>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("listener shutting down");
                    break;
                }

                accepted = self.listener.accept() => {
                    let (socket, peer_addr) = accepted
                        .context("failed to accept incoming connection")?;
                    tracing::info!("accepted connection from {}", peer_addr);

                    let transport = TlsTransport::new(
                        TlsRole::Server,
                        socket,
                        self.pre_shared_key.clone(),
                    );
                    let connection = FtlConnection::new(transport, self.events.clone());

                    // The handshake runs inside start(); keep it off the
                    // accept path so a slow peer cannot stall admission.
                    let orchestrator = Arc::clone(&orchestrator);
                    tokio::spawn(async move {
                        orchestrator.handle_new_connection(connection).await;
                    });
                }
            }
        }
        Ok(())
    }
}
