//! Core domain types

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide connection handle allocator
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque handle identifying one peer connection.
///
/// Handles, not pointers, travel through the event path; the routing core
/// looks the live connection up at dispatch time, so a stale handle is a
/// log line rather than a dangling reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next unused handle
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw handle value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Node metadata learned from a peer's intro
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub version_major: u8,
    pub version_minor: u8,
    pub version_revision: u8,
    /// Depth of the node in the relay topology; 0 for leaf nodes
    pub relay_layer: u8,
    pub region_code: String,
}

/// Load counters reported through NodeState messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeLoad {
    pub current_load: u32,
    pub maximum_load: u32,
}

/// Lifecycle of a peer connection.
///
/// `New → Handshaking → Pending → Active → Draining → Closed`; a
/// connection is Pending until its first intro arrives and counts in no
/// routing decision before that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    New,
    Handshaking,
    Pending,
    Active,
    Draining,
    Closed,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifecycle::New => write!(f, "new"),
            Lifecycle::Handshaking => write!(f, "handshaking"),
            Lifecycle::Pending => write!(f, "pending"),
            Lifecycle::Active => write!(f, "active"),
            Lifecycle::Draining => write!(f, "draining"),
            Lifecycle::Closed => write!(f, "closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::next();
        assert_eq!(format!("{}", id), format!("conn-{}", id.as_u64()));
    }

    #[test]
    fn test_lifecycle_display() {
        assert_eq!(format!("{}", Lifecycle::Pending), "pending");
        assert_eq!(format!("{}", Lifecycle::Draining), "draining");
    }
}
