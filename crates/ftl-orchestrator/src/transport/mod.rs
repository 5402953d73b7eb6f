//! Transport implementations
//!
//! `TlsTransport` is the production transport: one TLS 1.3 PSK stream per
//! peer. `DuplexTransport` is an in-memory pair used by tests.

pub mod memory;
pub mod tls;

pub use memory::DuplexTransport;
pub use tls::{TlsRole, TlsTransport, PSK_IDENTITY};
