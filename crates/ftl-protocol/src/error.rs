//! Protocol error types

use thiserror::Error;

use crate::message::MessageType;

/// Errors that can occur while encoding or decoding protocol data
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A big-endian integer was decoded from a slice of the wrong width
    #[error("decoding a {expected}-byte integer requires exactly {expected} bytes, got {actual}")]
    IntegerWidth { expected: usize, actual: usize },

    /// A payload is missing bytes from its fixed-size head.
    ///
    /// Frames carrying this defect cannot be trusted; the connection that
    /// produced one is closed.
    #[error("{message_type:?} payload is truncated: expected at least {expected} bytes, got {actual}")]
    TruncatedPayload {
        message_type: MessageType,
        expected: usize,
        actual: usize,
    },

    /// An embedded length prefix points past the end of the payload.
    ///
    /// The frame boundary itself is intact, so the connection stays open and
    /// the request is answered with a failure response.
    #[error(
        "{message_type:?} length prefix of {length} bytes at offset {offset} \
         runs off the edge of a {payload_len} byte payload"
    )]
    LengthPrefixOverrun {
        message_type: MessageType,
        length: usize,
        offset: usize,
        payload_len: usize,
    },

    /// Payload exceeds what the 16-bit length field can describe
    #[error("payload too large: {size} bytes exceeds the {max} byte maximum")]
    PayloadTooLarge { size: usize, max: usize },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
