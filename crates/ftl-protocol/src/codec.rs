//! Tokio codec for framed protocol messages

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::frame::{MessageHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};
use crate::message::Message;

/// A complete frame: header plus raw payload bytes.
///
/// The payload is kept raw so the connection layer can answer malformed
/// requests (and skip unassigned type tags) without losing the frame
/// boundary.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: MessageHeader,
    pub payload: Bytes,
}

impl Frame {
    /// Build a request frame for the given message, assigning it the
    /// supplied correlation id.
    pub fn request(message: &Message, message_id: u8) -> Result<Self, ProtocolError> {
        let payload = message.encode_payload().freeze();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let header = MessageHeader::request(
            message.message_type(),
            message_id,
            payload.len() as u16,
        );
        Ok(Self { header, payload })
    }

    /// Build an empty-bodied response frame echoing the request's id
    pub fn response(message_type: u8, message_id: u8, failure: bool) -> Self {
        Self {
            header: MessageHeader::response(message_type, message_id, failure),
            payload: Bytes::new(),
        }
    }

    /// Serialize header and payload into one buffer
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        self.header.encode(&mut buf);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }
}

/// Codec for encoding/decoding protocol frames.
///
/// Decoding is two-phase: the header is parsed once 4 bytes are buffered
/// and parked until the full payload has arrived, so frames survive
/// arbitrary fragmentation by the transport.
#[derive(Debug, Default)]
pub struct FrameCodec {
    /// Header parsed ahead of its payload, if any
    pending_header: Option<MessageHeader>,
}

impl FrameCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self {
            pending_header: None,
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = match self.pending_header.take() {
            Some(header) => header,
            None => match MessageHeader::decode(src) {
                Some(header) => header,
                None => return Ok(None), // Need more data
            },
        };

        let payload_len = header.payload_length as usize;
        if src.len() < payload_len {
            // Park the header and wait for the rest of the payload
            self.pending_header = Some(header);
            return Ok(None);
        }

        let payload = src.split_to(payload_len).freeze();
        Ok(Some(Frame { header, payload }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        frame.header.encode(dst);
        dst.extend_from_slice(&frame.payload);
        Ok(())
    }
}
