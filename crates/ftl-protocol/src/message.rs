//! Typed payloads for the orchestration protocol
//!
//! Byte layouts are fixed by the protocol; strings travel as raw UTF-8
//! without terminators, and `u16` length prefixes are big-endian.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::frame::{decode_u16, decode_u32};
use crate::ids::{ChannelId, StreamId};

/// Message type tags assigned by the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Node announces itself after connecting
    Intro = 0,
    /// Node signals intent to disconnect
    Outro = 1,
    /// Periodic load report
    NodeState = 2,
    /// Subscribe to / unsubscribe from a channel's streams
    ChannelSubscription = 16,
    /// A stream went live or ended on the sending node
    StreamPublish = 17,
    /// Instruct a node to start or stop forwarding a stream
    StreamRelay = 20,
}

impl MessageType {
    /// Convert to the wire tag
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from a wire tag. Unassigned tags yield `None`; frames
    /// carrying them are skipped for forward compatibility.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Intro),
            1 => Some(Self::Outro),
            2 => Some(Self::NodeState),
            16 => Some(Self::ChannelSubscription),
            17 => Some(Self::StreamPublish),
            20 => Some(Self::StreamRelay),
            _ => None,
        }
    }
}

/// Intro request body: node version, relay layer, region, and hostname
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntroPayload {
    pub version_major: u8,
    pub version_minor: u8,
    pub version_revision: u8,
    /// Depth of this node in the relay topology; 0 for leaf nodes
    pub relay_layer: u8,
    pub region_code: String,
    pub hostname: String,
}

impl IntroPayload {
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.version_major);
        dst.put_u8(self.version_minor);
        dst.put_u8(self.version_revision);
        dst.put_u8(self.relay_layer);
        dst.put_u16(self.region_code.len() as u16);
        dst.put_slice(self.region_code.as_bytes());
        dst.put_slice(self.hostname.as_bytes());
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() < 6 {
            return Err(ProtocolError::TruncatedPayload {
                message_type: MessageType::Intro,
                expected: 6,
                actual: payload.len(),
            });
        }
        let region_len = decode_u16(&payload[4..6])? as usize;
        if 6 + region_len > payload.len() {
            return Err(ProtocolError::LengthPrefixOverrun {
                message_type: MessageType::Intro,
                length: region_len,
                offset: 6,
                payload_len: payload.len(),
            });
        }
        Ok(Self {
            version_major: payload[0],
            version_minor: payload[1],
            version_revision: payload[2],
            relay_layer: payload[3],
            region_code: String::from_utf8_lossy(&payload[6..6 + region_len]).into_owned(),
            hostname: String::from_utf8_lossy(&payload[6 + region_len..]).into_owned(),
        })
    }
}

/// Outro request body: free-form disconnect reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutroPayload {
    pub reason: String,
}

impl OutroPayload {
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_slice(self.reason.as_bytes());
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        Ok(Self {
            reason: String::from_utf8_lossy(payload).into_owned(),
        })
    }
}

/// NodeState request body: current and maximum load, exactly 8 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStatePayload {
    pub current_load: u32,
    pub maximum_load: u32,
}

impl NodeStatePayload {
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u32(self.current_load);
        dst.put_u32(self.maximum_load);
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() < 8 {
            return Err(ProtocolError::TruncatedPayload {
                message_type: MessageType::NodeState,
                expected: 8,
                actual: payload.len(),
            });
        }
        Ok(Self {
            current_load: decode_u32(&payload[0..4])?,
            maximum_load: decode_u32(&payload[4..8])?,
        })
    }
}

/// ChannelSubscription request body: subscribe flag, channel, stream key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionPayload {
    pub is_subscribe: bool,
    pub channel_id: ChannelId,
    /// Opaque token the origin presents when forwarding media to the
    /// subscriber; empty on unsubscribe
    pub stream_key: Bytes,
}

impl SubscriptionPayload {
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.is_subscribe as u8);
        dst.put_u32(self.channel_id.as_u32());
        dst.put_slice(&self.stream_key);
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() < 5 {
            return Err(ProtocolError::TruncatedPayload {
                message_type: MessageType::ChannelSubscription,
                expected: 5,
                actual: payload.len(),
            });
        }
        Ok(Self {
            is_subscribe: payload[0] == 1,
            channel_id: ChannelId::new(decode_u32(&payload[1..5])?),
            stream_key: Bytes::copy_from_slice(&payload[5..]),
        })
    }
}

/// StreamPublish request body: publish flag, channel, stream, exactly 9 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishPayload {
    pub is_publish: bool,
    pub channel_id: ChannelId,
    pub stream_id: StreamId,
}

impl PublishPayload {
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.is_publish as u8);
        dst.put_u32(self.channel_id.as_u32());
        dst.put_u32(self.stream_id.as_u32());
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() < 9 {
            return Err(ProtocolError::TruncatedPayload {
                message_type: MessageType::StreamPublish,
                expected: 9,
                actual: payload.len(),
            });
        }
        Ok(Self {
            is_publish: payload[0] == 1,
            channel_id: ChannelId::new(decode_u32(&payload[1..5])?),
            stream_id: StreamId::new(decode_u32(&payload[5..9])?),
        })
    }
}

/// StreamRelay request body: start/stop flag, channel, stream, target
/// hostname (u16 length prefix), stream key to the end of the payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayPayload {
    pub is_start_relay: bool,
    pub channel_id: ChannelId,
    pub stream_id: StreamId,
    /// Node the origin should forward the stream to
    pub target_hostname: String,
    /// Authorization token for the forwarded stream; empty on stop
    pub stream_key: Bytes,
}

impl RelayPayload {
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.is_start_relay as u8);
        dst.put_u32(self.channel_id.as_u32());
        dst.put_u32(self.stream_id.as_u32());
        dst.put_u16(self.target_hostname.len() as u16);
        dst.put_slice(self.target_hostname.as_bytes());
        dst.put_slice(&self.stream_key);
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() < 11 {
            return Err(ProtocolError::TruncatedPayload {
                message_type: MessageType::StreamRelay,
                expected: 11,
                actual: payload.len(),
            });
        }
        let hostname_len = decode_u16(&payload[9..11])? as usize;
        if 11 + hostname_len > payload.len() {
            return Err(ProtocolError::LengthPrefixOverrun {
                message_type: MessageType::StreamRelay,
                length: hostname_len,
                offset: 11,
                payload_len: payload.len(),
            });
        }
        Ok(Self {
            is_start_relay: payload[0] == 1,
            channel_id: ChannelId::new(decode_u32(&payload[1..5])?),
            stream_id: StreamId::new(decode_u32(&payload[5..9])?),
            target_hostname: String::from_utf8_lossy(&payload[11..11 + hostname_len])
                .into_owned(),
            stream_key: Bytes::copy_from_slice(&payload[11 + hostname_len..]),
        })
    }
}

/// A typed protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Intro(IntroPayload),
    Outro(OutroPayload),
    NodeState(NodeStatePayload),
    ChannelSubscription(SubscriptionPayload),
    StreamPublish(PublishPayload),
    StreamRelay(RelayPayload),
}

impl Message {
    /// Get the wire type tag for this message
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Intro(_) => MessageType::Intro,
            Message::Outro(_) => MessageType::Outro,
            Message::NodeState(_) => MessageType::NodeState,
            Message::ChannelSubscription(_) => MessageType::ChannelSubscription,
            Message::StreamPublish(_) => MessageType::StreamPublish,
            Message::StreamRelay(_) => MessageType::StreamRelay,
        }
    }

    /// Serialize the payload body (header not included)
    pub fn encode_payload(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        match self {
            Message::Intro(p) => p.encode(&mut buf),
            Message::Outro(p) => p.encode(&mut buf),
            Message::NodeState(p) => p.encode(&mut buf),
            Message::ChannelSubscription(p) => p.encode(&mut buf),
            Message::StreamPublish(p) => p.encode(&mut buf),
            Message::StreamRelay(p) => p.encode(&mut buf),
        }
        buf
    }

    /// Deserialize a payload body of the given type
    pub fn decode(message_type: MessageType, payload: &[u8]) -> Result<Self, ProtocolError> {
        match message_type {
            MessageType::Intro => IntroPayload::decode(payload).map(Message::Intro),
            MessageType::Outro => OutroPayload::decode(payload).map(Message::Outro),
            MessageType::NodeState => NodeStatePayload::decode(payload).map(Message::NodeState),
            MessageType::ChannelSubscription => {
                SubscriptionPayload::decode(payload).map(Message::ChannelSubscription)
            }
            MessageType::StreamPublish => {
                PublishPayload::decode(payload).map(Message::StreamPublish)
            }
            MessageType::StreamRelay => RelayPayload::decode(payload).map(Message::StreamRelay),
        }
    }
}
