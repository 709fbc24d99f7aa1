//! PnP ID characteristic packing
//!
//! Hubs identify themselves through the Device Information PnP ID
//! characteristic: a vendor ID source byte followed by vendor ID, product
//! ID and product version as little-endian `u16`s.

use crate::error::ParseError;
use crate::LEGO_CID;

/// Size of a packed PnP ID in bytes
pub const PNP_ID_LEN: usize = 7;

/// Namespace of the vendor ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VendorIdSource {
    /// Bluetooth SIG assigned company identifier
    Bluetooth,
    /// USB Implementer's Forum assigned vendor ID
    Usb,
}

/// Contents of the PnP ID characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PnpId {
    pub vendor_id_source: VendorIdSource,
    pub vendor_id: u16,
    pub product_id: u16,
    pub product_version: u16,
}

impl PnpId {
    /// PnP ID with the LEGO Bluetooth vendor ID
    pub fn lego(product_id: u16, product_version: u16) -> Self {
        Self {
            vendor_id_source: VendorIdSource::Bluetooth,
            vendor_id: LEGO_CID,
            product_id,
            product_version,
        }
    }

    /// Pack into the 7-byte characteristic value
    pub fn pack(&self) -> [u8; PNP_ID_LEN] {
        let mut out = [0u8; PNP_ID_LEN];
        out[0] = match self.vendor_id_source {
            VendorIdSource::Bluetooth => 1,
            VendorIdSource::Usb => 0,
        };
        out[1..3].copy_from_slice(&self.vendor_id.to_le_bytes());
        out[3..5].copy_from_slice(&self.product_id.to_le_bytes());
        out[5..7].copy_from_slice(&self.product_version.to_le_bytes());
        out
    }

    /// Unpack a characteristic value
    pub fn unpack(data: &[u8]) -> Result<Self, ParseError> {
        let data: &[u8; PNP_ID_LEN] = data.try_into().map_err(|_| ParseError::InvalidLength {
            expected: PNP_ID_LEN,
            actual: data.len(),
        })?;

        Ok(Self {
            vendor_id_source: if data[0] != 0 {
                VendorIdSource::Bluetooth
            } else {
                VendorIdSource::Usb
            },
            vendor_id: u16::from_le_bytes([data[1], data[2]]),
            product_id: u16::from_le_bytes([data[3], data[4]]),
            product_version: u16::from_le_bytes([data[5], data[6]]),
        })
    }
}
