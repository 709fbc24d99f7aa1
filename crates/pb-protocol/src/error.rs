//! Error types for broadcast message encoding and decoding

use thiserror::Error;

/// Reasons a byte string is not a valid broadcast message
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Buffer ended before a header or payload was complete
    #[error("truncated message: need {needed} more bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    /// Header carries a type tag outside the known set
    #[error("unknown data type tag: {0}")]
    UnknownDataType(u8),

    /// Header size does not fit the data type
    #[error("invalid size {size} for {data_type}")]
    InvalidSize {
        data_type: &'static str,
        size: u8,
    },

    /// STR payload is not valid UTF-8
    #[error("invalid UTF-8 in string payload at offset {0}")]
    InvalidUtf8(usize),

    /// Message has no channel byte
    #[error("empty message")]
    Empty,

    /// Fixed-length structure has the wrong length
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Errors surfaced by the broadcast message codec
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Encoded message would exceed the advertisement space
    #[error("payload too large: {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },

    /// Received bytes are not a well-formed message
    #[error("malformed message: {0}")]
    MalformedMessage(#[from] ParseError),
}
