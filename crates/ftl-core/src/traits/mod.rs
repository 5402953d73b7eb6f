//! Capability traits

mod connection;
mod transport;

pub use connection::{
    ConnectionEvent, ConnectionEventKind, ConnectionResult, NodeConnection,
};
pub use transport::Transport;
