//! ftl-core: Shared foundations for the FTL orchestrator
//!
//! Domain types, error taxonomy, configuration loading, and the capability
//! traits that decouple the routing core from concrete connections and
//! transports.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::OrchestratorConfig;
pub use error::{ConfigError, ConnectionError, TransportError};
pub use types::{ConnectionId, Lifecycle, NodeInfo, NodeLoad};
