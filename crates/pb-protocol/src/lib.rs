//! Pybricks BLE Broadcast Protocol Library
//!
//! This crate provides encoding and decoding of the connectionless
//! broadcast/observe messages exchanged by Pybricks hubs. Messages travel in
//! the manufacturer-specific data of a BLE advertisement, keyed by the LEGO
//! company identifier.
//!
//! # Architecture
//!
//! - [`Value`] is the closed set of types a message can carry
//! - [`encode_message`] / [`decode_message`] convert between a
//!   `(channel, values)` pair and the wire bytes
//! - [`PnpId`] packs the Device Information PnP ID characteristic
//!
//! The wire format is an unauthenticated public broadcast protocol: anything
//! nearby can read or forge it.
//!
//! # Example
//!
//! ```rust
//! use pb_protocol::{decode_message, encode_message, Value};
//!
//! let encoded = encode_message(200, &[Value::Int(5)]).unwrap();
//! assert_eq!(encoded, b"\xc8\x00\x61\x05");
//!
//! let message = decode_message(&encoded).unwrap();
//! assert_eq!(message.channel, 200);
//! assert_eq!(message.values, vec![Value::Int(5)]);
//! ```

pub mod codec;
pub mod error;
pub mod pnp;
pub mod value;

pub use codec::{decode_message, encode_message, Message};
pub use error::{ParseError, ProtocolError};
pub use pnp::{PnpId, VendorIdSource};
pub use value::{DataType, DisplayValues, Value};

/// LEGO System A/S company identifier
pub const LEGO_CID: u16 = 0x0397;

/// Highest broadcast channel
pub const MAX_CHANNEL: u8 = 255;

/// Maximum observed data in an advertising packet:
/// 31 (max advertising data) - 5 (AD header, company ID, channel)
pub const OBSERVED_DATA_MAX_SIZE: usize = 31 - 5;

/// Maximum encoded message size, channel byte included
pub const MAX_MESSAGE_SIZE: usize = OBSERVED_DATA_MAX_SIZE + 1;

/// Maximum length of the advertising data field of a legacy advertisement
pub const MAX_ADVERTISING_DATA_LEN: usize = 31;
