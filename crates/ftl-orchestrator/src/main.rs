//! FTL Orchestrator Daemon
//!
//! Accepts TLS-PSK connections from ingest, edge, and relay nodes and
//! routes live streams between them.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ftl_core::config::OrchestratorConfig;
use ftl_orchestrator::connection::FtlConnection;
use ftl_orchestrator::server::OrchestrationListener;
use ftl_orchestrator::transport::TlsTransport;
use ftl_orchestrator::Orchestrator;

/// Capacity of the event channel feeding the routing core. Each inbound
/// request occupies a slot until the dispatch loop picks it up.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Parser)]
#[command(name = "ftl-orchestrator")]
#[command(about = "FTL stream orchestration service")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("FTL orchestrator starting...");

    let config = match &args.config {
        Some(path) => OrchestratorConfig::load(path)
            .with_context(|| format!("failed to load config from {:?}", path))?,
        None => OrchestratorConfig::default(),
    };
    let port = args.port.unwrap_or(config.listen_port);
    let pre_shared_key = config
        .pre_shared_key()
        .context("invalid pre-shared key")?;

    // Graceful shutdown on Ctrl+C or SIGTERM
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("received SIGTERM, initiating shutdown...");
            }
        }
        signal_cancel.cancel();
    });

    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let orchestrator = Arc::new(Orchestrator::<FtlConnection<TlsTransport>>::new());
    tokio::spawn(Arc::clone(&orchestrator).run(event_rx));

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let listener = OrchestrationListener::bind(addr, pre_shared_key, event_tx, cancel.clone())?;
    listener.serve(Arc::clone(&orchestrator)).await?;

    orchestrator.stop().await;
    tracing::info!("orchestrator shutdown complete");
    Ok(())
}
