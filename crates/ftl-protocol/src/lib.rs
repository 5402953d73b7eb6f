//! ftl-protocol: Wire format for the FTL orchestration protocol
//!
//! This crate defines the length-prefixed binary protocol spoken between
//! the orchestrator and ingest/edge/relay nodes: the 4-byte message header,
//! the typed payload schemas, and a tokio codec for reassembling frames
//! from a byte stream.

pub mod codec;
pub mod error;
pub mod frame;
pub mod ids;
pub mod message;

pub use codec::{Frame, FrameCodec};
pub use error::ProtocolError;
pub use frame::{MessageDirection, MessageHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use ids::{ChannelId, StreamId};
pub use message::{
    IntroPayload, Message, MessageType, NodeStatePayload, OutroPayload, PublishPayload,
    RelayPayload, SubscriptionPayload,
};
