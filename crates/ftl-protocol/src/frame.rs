//! Message header encoding/decoding
//!
//! Every orchestration protocol message opens with a 4-byte header:
//! - byte 0: direction (bit 7, set = response), failure flag (bit 6),
//!   message type tag (bits 5..0)
//! - byte 1: message id (u8, assigned per connection, wraps)
//! - bytes 2..3: payload length (u16, big-endian)
//!
//! All multi-byte integers on the wire are big-endian regardless of the
//! host byte order.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;
use crate::message::MessageType;

/// Size of the message header in bytes
pub const HEADER_SIZE: usize = 4;

/// Maximum payload size, limited by the 16-bit length field
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

const DIRECTION_BIT: u8 = 0b1000_0000;
const FAILURE_BIT: u8 = 0b0100_0000;
const TYPE_MASK: u8 = 0b0011_1111;

/// Whether a message initiates a request or answers one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    Request,
    Response,
}

/// Message header carrying direction, type, correlation id, and length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Request or response
    pub direction: MessageDirection,
    /// Failure flag; meaningful on responses only
    pub failure: bool,
    /// Six-bit message type tag. Kept raw so frames with unassigned tags
    /// can be skipped without losing stream synchronization.
    pub message_type: u8,
    /// Correlation id echoed by the matching response
    pub message_id: u8,
    /// Length of the payload that follows the header
    pub payload_length: u16,
}

impl MessageHeader {
    /// Header for an outbound request of the given type
    pub fn request(message_type: MessageType, message_id: u8, payload_length: u16) -> Self {
        Self {
            direction: MessageDirection::Request,
            failure: false,
            message_type: message_type.as_u8(),
            message_id,
            payload_length,
        }
    }

    /// Header for a response to a request. Responses carry no payload;
    /// success or failure is conveyed through the failure flag.
    pub fn response(message_type: u8, message_id: u8, failure: bool) -> Self {
        Self {
            direction: MessageDirection::Response,
            failure,
            message_type: message_type & TYPE_MASK,
            message_id,
            payload_length: 0,
        }
    }

    /// Encode the header into a byte buffer
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        let mut descriptor = self.message_type & TYPE_MASK;
        if self.direction == MessageDirection::Response {
            descriptor |= DIRECTION_BIT;
        }
        if self.failure {
            descriptor |= FAILURE_BIT;
        }
        dst.put_u8(descriptor);
        dst.put_u8(self.message_id);
        dst.put_u16(self.payload_length);
    }

    /// Decode a header from a byte buffer.
    ///
    /// Returns `None` if fewer than 4 bytes are buffered; consumes exactly
    /// 4 bytes on success. Every 4-byte pattern is a structurally valid
    /// header, so this cannot fail outright.
    pub fn decode(src: &mut BytesMut) -> Option<Self> {
        if src.len() < HEADER_SIZE {
            return None;
        }

        let descriptor = src.get_u8();
        let direction = if descriptor & DIRECTION_BIT == 0 {
            MessageDirection::Request
        } else {
            MessageDirection::Response
        };
        let failure = descriptor & FAILURE_BIT != 0;
        let message_type = descriptor & TYPE_MASK;
        let message_id = src.get_u8();
        let payload_length = src.get_u16();

        Some(Self {
            direction,
            failure,
            message_type,
            message_id,
            payload_length,
        })
    }
}

/// Encode a u16 in network byte order
pub fn encode_u16(value: u16) -> [u8; 2] {
    value.to_be_bytes()
}

/// Encode a u32 in network byte order
pub fn encode_u32(value: u32) -> [u8; 4] {
    value.to_be_bytes()
}

/// Decode a big-endian u16 from a slice of exactly 2 bytes
pub fn decode_u16(bytes: &[u8]) -> Result<u16, ProtocolError> {
    let bytes: [u8; 2] = bytes
        .try_into()
        .map_err(|_| ProtocolError::IntegerWidth {
            expected: 2,
            actual: bytes.len(),
        })?;
    Ok(u16::from_be_bytes(bytes))
}

/// Decode a big-endian u32 from a slice of exactly 4 bytes
pub fn decode_u32(bytes: &[u8]) -> Result<u32, ProtocolError> {
    let bytes: [u8; 4] = bytes
        .try_into()
        .map_err(|_| ProtocolError::IntegerWidth {
            expected: 4,
            actual: bytes.len(),
        })?;
    Ok(u32::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let headers = [
            MessageHeader::request(MessageType::Intro, 0, 17),
            MessageHeader::request(MessageType::Outro, 7, 0),
            MessageHeader::request(MessageType::NodeState, 255, 8),
            MessageHeader::request(MessageType::ChannelSubscription, 42, 21),
            MessageHeader::request(MessageType::StreamPublish, 1, 9),
            MessageHeader::request(MessageType::StreamRelay, 2, u16::MAX),
            MessageHeader::response(MessageType::Intro.as_u8(), 0, false),
            MessageHeader::response(MessageType::StreamRelay.as_u8(), 200, true),
        ];

        for header in headers {
            let mut buf = BytesMut::with_capacity(HEADER_SIZE);
            header.encode(&mut buf);
            assert_eq!(buf.len(), HEADER_SIZE);

            let decoded = MessageHeader::decode(&mut buf).unwrap();
            assert_eq!(decoded, header);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn test_header_bit_layout() {
        let header = MessageHeader::response(MessageType::StreamRelay.as_u8(), 0xab, true);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);

        // Response bit, failure bit, and type 20 packed into byte 0
        assert_eq!(buf[0], 0b1100_0000 | 20);
        assert_eq!(buf[1], 0xab);
        assert_eq!(&buf[2..4], &[0, 0]);
    }

    #[test]
    fn test_payload_length_is_big_endian() {
        let header = MessageHeader::request(MessageType::Outro, 0, 0x0102);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(&buf[2..4], &[0x01, 0x02]);
    }

    #[test]
    fn test_insufficient_bytes() {
        let mut buf = BytesMut::from(&[0u8; 3][..]);
        assert!(MessageHeader::decode(&mut buf).is_none());
        // Nothing consumed while waiting for the full header
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_unassigned_type_tag_survives() {
        let mut buf = BytesMut::from(&[0x3f, 9, 0, 2][..]);
        let header = MessageHeader::decode(&mut buf).unwrap();
        assert_eq!(header.message_type, 0x3f);
        assert_eq!(header.direction, MessageDirection::Request);
        assert_eq!(header.payload_length, 2);
    }

    #[test]
    fn test_u32_endianness() {
        for value in [0u32, 1, 0x8000_0000, u32::MAX] {
            let encoded = encode_u32(value);
            assert_eq!(encoded[0], (value >> 24) as u8, "MSB first for {value}");
            assert_eq!(encoded[3], value as u8, "LSB last for {value}");
            assert_eq!(decode_u32(&encoded).unwrap(), value);
        }
    }

    #[test]
    fn test_u16_endianness() {
        for value in [0u16, 1, 0x1234, u16::MAX] {
            let encoded = encode_u16(value);
            assert_eq!(encoded[0], (value >> 8) as u8);
            assert_eq!(encoded[1], value as u8);
            assert_eq!(decode_u16(&encoded).unwrap(), value);
        }
    }

    #[test]
    fn test_strict_integer_widths() {
        assert!(matches!(
            decode_u32(&[1, 2, 3]),
            Err(ProtocolError::IntegerWidth {
                expected: 4,
                actual: 3
            })
        ));
        assert!(matches!(
            decode_u32(&[1, 2, 3, 4, 5]),
            Err(ProtocolError::IntegerWidth {
                expected: 4,
                actual: 5
            })
        ));
        assert!(matches!(
            decode_u16(&[1]),
            Err(ProtocolError::IntegerWidth {
                expected: 2,
                actual: 1
            })
        ));
    }
}
