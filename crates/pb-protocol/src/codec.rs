//! Broadcast message codec
//!
//! # Format
//! ```text
//! byte 0:        channel (u8)
//! byte 1 (opt):  0x00                  single-object marker, iff exactly one value follows
//! byte N:        header = (tag << 5) | size
//! byte N+1..:    size bytes of payload (absent for booleans)
//! ... repeated until end of buffer ...
//! ```
//!
//! The whole message, channel byte included, is limited to
//! [`MAX_MESSAGE_SIZE`] bytes.

use std::fmt;

use tracing::trace;

use crate::error::{ParseError, ProtocolError};
use crate::value::{int_width, DataType, DisplayValues, Value};
use crate::MAX_MESSAGE_SIZE;

/// A decoded broadcast message
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Message {
    /// Broadcast channel (0 to 255)
    pub channel: u8,
    /// Values in wire order
    pub values: Vec<Value>,
}

impl Message {
    /// Create a message for the given channel
    pub fn new(channel: u8, values: Vec<Value>) -> Self {
        Self { channel, values }
    }

    /// Encode this message to its wire format
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode_message(self.channel, &self.values)
    }

    /// Decode a message from its wire format
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        decode_message(data)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel {}: {}", self.channel, DisplayValues(&self.values))
    }
}

/// Encode values as a broadcast message on `channel`
///
/// A lone value is preceded by the single-object marker. Fails with
/// [`ProtocolError::PayloadTooLarge`] if the result would exceed
/// [`MAX_MESSAGE_SIZE`] bytes.
pub fn encode_message(channel: u8, values: &[Value]) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::with_capacity(MAX_MESSAGE_SIZE);
    out.push(channel);

    if values.len() == 1 {
        out.push(DataType::SingleObject.header(0));
    }

    for value in values {
        // Sizes above 31 cannot be represented in the header, and always
        // overflow the message anyway.
        let size = out.len() + value.encoded_len();
        if size > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size,
                max: MAX_MESSAGE_SIZE,
            });
        }
        encode_value(value, &mut out);
    }

    trace!("Encoded channel {} message: {:02X?}", channel, out);
    Ok(out)
}

fn encode_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Bool(_) => out.push(value.data_type().header(0)),
        Value::Int(v) => {
            let width = int_width(*v);
            out.push(DataType::Int.header(width as u8));
            match width {
                1 => out.extend_from_slice(&(*v as i8).to_le_bytes()),
                2 => out.extend_from_slice(&(*v as i16).to_le_bytes()),
                _ => out.extend_from_slice(&v.to_le_bytes()),
            }
        }
        Value::Float(v) => {
            out.push(DataType::Float.header(4));
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::Str(s) => {
            out.push(DataType::Str.header(s.len() as u8));
            out.extend_from_slice(s.as_bytes());
        }
        Value::Bytes(b) => {
            out.push(DataType::Bytes.header(b.len() as u8));
            out.extend_from_slice(b);
        }
    }
}

/// Decode a broadcast message
///
/// The single-object marker is consumed silently: the result always holds
/// the decoded values as a sequence.
pub fn decode_message(data: &[u8]) -> Result<Message, ProtocolError> {
    let (&channel, mut rest) = data.split_first().ok_or(ParseError::Empty)?;
    let mut values = Vec::new();

    while !rest.is_empty() {
        let offset = data.len() - rest.len();
        let (data_type, size) = DataType::split_header(rest[0])?;
        rest = &rest[1..];

        let payload = take(&mut rest, size as usize, offset + 1)?;
        if let Some(value) = decode_value(data_type, payload, offset + 1)? {
            values.push(value);
        }
    }

    Ok(Message { channel, values })
}

fn take<'a>(rest: &mut &'a [u8], size: usize, offset: usize) -> Result<&'a [u8], ParseError> {
    if rest.len() < size {
        return Err(ParseError::Truncated {
            offset,
            needed: size - rest.len(),
        });
    }
    let (payload, tail) = rest.split_at(size);
    *rest = tail;
    Ok(payload)
}

fn decode_value(
    data_type: DataType,
    payload: &[u8],
    offset: usize,
) -> Result<Option<Value>, ParseError> {
    let invalid_size = || ParseError::InvalidSize {
        data_type: data_type.name(),
        size: payload.len() as u8,
    };

    let value = match data_type {
        DataType::SingleObject => {
            if !payload.is_empty() {
                return Err(invalid_size());
            }
            return Ok(None);
        }
        DataType::True | DataType::False => {
            if !payload.is_empty() {
                return Err(invalid_size());
            }
            Value::Bool(data_type == DataType::True)
        }
        DataType::Int => match *payload {
            [b0] => Value::Int(i8::from_le_bytes([b0]).into()),
            [b0, b1] => Value::Int(i16::from_le_bytes([b0, b1]).into()),
            [b0, b1, b2, b3] => Value::Int(i32::from_le_bytes([b0, b1, b2, b3])),
            _ => return Err(invalid_size()),
        },
        DataType::Float => match *payload {
            [b0, b1, b2, b3] => Value::Float(f32::from_le_bytes([b0, b1, b2, b3])),
            _ => return Err(invalid_size()),
        },
        DataType::Str => {
            let text =
                std::str::from_utf8(payload).map_err(|_| ParseError::InvalidUtf8(offset))?;
            Value::Str(text.to_string())
        }
        DataType::Bytes => Value::Bytes(payload.to_vec()),
    };

    Ok(Some(value))
}
