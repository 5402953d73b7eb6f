//! ftl-orchestrator: Coordinator for a fleet of FTL streaming nodes
//!
//! Ingest and edge nodes open mutually-authenticated TLS connections to the
//! orchestrator, announce themselves, publish the streams they host, or
//! subscribe to channels they want to serve. The orchestrator keeps the
//! global view of live streams and subscriptions and, for every matching
//! (stream, subscriber) pair, instructs the stream's origin to start or
//! stop relaying to the subscriber.

pub mod connection;
pub mod orchestrator;
pub mod server;
pub mod store;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use connection::FtlConnection;
pub use orchestrator::Orchestrator;
pub use server::OrchestrationListener;
