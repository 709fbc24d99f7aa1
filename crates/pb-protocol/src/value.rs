//! Typed values carried in a broadcast message
//!
//! This module provides the `Value` enum, the closed set of types that can be
//! broadcast, and `DataType`, the 3-bit wire tag identifying each of them.

use std::fmt;

use crate::error::ParseError;

/// Wire type tags
///
/// These values are sent over the air, so the numbers must not change.
/// At most 8 tags fit in the 3-bit header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum DataType {
    /// Marker: the next value is the one and only value (not a tuple)
    SingleObject = 0,
    /// Boolean true, no payload
    True = 1,
    /// Boolean false, no payload
    False = 2,
    /// Signed little-endian integer of 1, 2 or 4 bytes
    Int = 3,
    /// Little-endian IEEE-754 single precision float
    Float = 4,
    /// UTF-8 text
    Str = 5,
    /// Raw bytes
    Bytes = 6,
}

impl DataType {
    /// Returns a human-readable name for the data type
    pub fn name(&self) -> &'static str {
        match self {
            DataType::SingleObject => "SINGLE_OBJECT",
            DataType::True => "TRUE",
            DataType::False => "FALSE",
            DataType::Int => "INT",
            DataType::Float => "FLOAT",
            DataType::Str => "STR",
            DataType::Bytes => "BYTES",
        }
    }

    /// Build a header byte from this tag and a payload size
    pub fn header(self, size: u8) -> u8 {
        ((self as u8) << 5) | (size & 0x1F)
    }

    /// Split a header byte into its tag and size fields
    pub fn split_header(header: u8) -> Result<(DataType, u8), ParseError> {
        let data_type = DataType::try_from(header >> 5)?;
        Ok((data_type, header & 0x1F))
    }
}

impl TryFrom<u8> for DataType {
    type Error = ParseError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(DataType::SingleObject),
            1 => Ok(DataType::True),
            2 => Ok(DataType::False),
            3 => Ok(DataType::Int),
            4 => Ok(DataType::Float),
            5 => Ok(DataType::Str),
            6 => Ok(DataType::Bytes),
            other => Err(ParseError::UnknownDataType(other)),
        }
    }
}

/// A single value in a broadcast message
///
/// Integers are limited to the 32-bit range the wire format can carry.
/// Floats are single precision: converting an `f64` narrows it, which is
/// lossy and cannot be undone on the receiving side.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum Value {
    Bool(bool),
    Int(i32),
    Float(f32),
    Str(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// Wire tag used for this value
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Bool(true) => DataType::True,
            Value::Bool(false) => DataType::False,
            Value::Int(_) => DataType::Int,
            Value::Float(_) => DataType::Float,
            Value::Str(_) => DataType::Str,
            Value::Bytes(_) => DataType::Bytes,
        }
    }

    /// Number of bytes this value occupies on the wire, header included
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Value::Bool(_) => 0,
            Value::Int(v) => int_width(*v),
            Value::Float(_) => 4,
            Value::Str(s) => s.len(),
            Value::Bytes(b) => b.len(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }
}

/// Smallest signed width (1, 2 or 4 bytes) that holds `value`
pub(crate) fn int_width(value: i32) -> usize {
    if i8::try_from(value).is_ok() {
        1
    } else if i16::try_from(value).is_ok() {
        2
    } else {
        4
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(v) => write!(f, "{:?}", v),
            Value::Bytes(v) => write!(f, "b{:02X?}", v),
        }
    }
}

/// Displays a value sequence as a parenthesized, comma separated list
pub struct DisplayValues<'a>(pub &'a [Value]);

impl fmt::Display for DisplayValues<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", value)?;
        }
        write!(f, ")")
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::Int(v.into())
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int(v.into())
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::Int(v.into())
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::Int(v.into())
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

/// Narrows to single precision. Lossy.
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v as f32)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}
