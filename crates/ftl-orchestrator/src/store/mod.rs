//! Thread-safe stores for streams and channel subscriptions

mod stream;
mod subscription;

pub use stream::{StreamEntry, StreamStore};
pub use subscription::{ChannelSubscription, SubscriptionStore};

use ftl_protocol::ids::ChannelId;
use thiserror::Error;

/// Errors reported by the stores
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A stream already exists for the channel
    #[error("a stream already exists for channel {0}")]
    DuplicateChannel(ChannelId),

    /// The dual indices disagree; state is damaged
    #[error("store indices are inconsistent: {0}")]
    Inconsistent(&'static str),
}
