//! Filter pipeline for received advertisements
//!
//! [`evaluate`] decides whether a [`RawAdvertisement`] carries a message the
//! observer is interested in. Checks run cheapest first and stop at the
//! first rejection:
//!
//! 1. RSSI threshold
//! 2. Device name prefix (a missing name never rejects)
//! 3. Manufacturer ID present
//! 4. Payload decodes
//! 5. Channel allow-list

use pb_protocol::{decode_message, ProtocolError, Value, LEGO_CID};
use thiserror::Error;

use crate::transport::RawAdvertisement;

/// Filter settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterConfig {
    /// Minimum RSSI in dBm
    pub rssi_threshold: Option<i16>,
    /// Prefix the local name must start with, when a name is present
    pub device_pattern: Option<String>,
    /// Manufacturer data key holding the message
    pub manufacturer_id: u16,
    /// Accepted channels (empty: all)
    pub channels: Vec<u8>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            rssi_threshold: None,
            device_pattern: None,
            manufacturer_id: LEGO_CID,
            channels: Vec::new(),
        }
    }
}

/// An accepted advertisement
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub channel: u8,
    pub values: Vec<Value>,
    pub rssi: i16,
}

/// Reason an advertisement was rejected
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Rejection {
    #[error("RSSI {rssi} below threshold {threshold}")]
    WeakSignal { rssi: i16, threshold: i16 },

    #[error("device name {0:?} does not match")]
    DeviceName(String),

    #[error("no manufacturer data for company {0:#06x}")]
    MissingManufacturerData(u16),

    #[error("malformed message: {0}")]
    Malformed(#[from] ProtocolError),

    #[error("channel {0} not observed")]
    ChannelNotObserved(u8),
}

/// Run all checks, reporting the first failing one
pub fn evaluate(raw: &RawAdvertisement, config: &FilterConfig) -> Result<Observation, Rejection> {
    if let Some(threshold) = config.rssi_threshold {
        if raw.rssi < threshold {
            return Err(Rejection::WeakSignal {
                rssi: raw.rssi,
                threshold,
            });
        }
    }

    if let (Some(pattern), Some(name)) = (&config.device_pattern, &raw.local_name) {
        if !name.starts_with(pattern.as_str()) {
            return Err(Rejection::DeviceName(name.clone()));
        }
    }

    let data = raw
        .manufacturer_data
        .get(&config.manufacturer_id)
        .ok_or(Rejection::MissingManufacturerData(config.manufacturer_id))?;

    let message = decode_message(data)?;

    if !config.channels.is_empty() && !config.channels.contains(&message.channel) {
        return Err(Rejection::ChannelNotObserved(message.channel));
    }

    Ok(Observation {
        channel: message.channel,
        values: message.values,
        rssi: raw.rssi,
    })
}

/// Accepted observation, or `None`
pub fn accept(raw: &RawAdvertisement, config: &FilterConfig) -> Option<Observation> {
    evaluate(raw, config).ok()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn advertisement(name: Option<&str>, payload: &[u8], rssi: i16) -> RawAdvertisement {
        RawAdvertisement {
            local_name: name.map(str::to_string),
            manufacturer_data: HashMap::from([(LEGO_CID, payload.to_vec())]),
            rssi,
        }
    }

    // -------------------------------------------------------------------------
    // Individual checks
    // -------------------------------------------------------------------------

    #[test]
    fn test_accepts_valid_message() {
        let raw = advertisement(Some("Pybricks Hub"), b"\x01\x61\x2a\x61\x18", -50);
        let observation = accept(&raw, &FilterConfig::default()).unwrap();

        assert_eq!(observation.channel, 1);
        assert_eq!(observation.values, vec![Value::Int(42), Value::Int(24)]);
        assert_eq!(observation.rssi, -50);
    }

    #[test]
    fn test_rssi_short_circuits() {
        // Valid payload on a watched channel, but too weak
        let raw = advertisement(Some("hub"), b"\x01\x00\x61\x05", -90);
        let config = FilterConfig {
            rssi_threshold: Some(-80),
            channels: vec![1],
            ..Default::default()
        };

        assert_eq!(
            evaluate(&raw, &config),
            Err(Rejection::WeakSignal {
                rssi: -90,
                threshold: -80
            })
        );
    }

    #[test]
    fn test_rssi_at_threshold_accepted() {
        let raw = advertisement(None, b"\x01\x00\x61\x05", -80);
        let config = FilterConfig {
            rssi_threshold: Some(-80),
            ..Default::default()
        };
        assert!(accept(&raw, &config).is_some());
    }

    #[test]
    fn test_device_pattern() {
        let config = FilterConfig {
            device_pattern: Some("Pybricks".into()),
            ..Default::default()
        };

        let other = advertisement(Some("Phone"), b"\x01\x00\x61\x05", -40);
        assert_eq!(
            evaluate(&other, &config),
            Err(Rejection::DeviceName("Phone".into()))
        );

        let matching = advertisement(Some("Pybricks Hub"), b"\x01\x00\x61\x05", -40);
        assert!(accept(&matching, &config).is_some());

        // Passive scans usually carry no name
        let anonymous = advertisement(None, b"\x01\x00\x61\x05", -40);
        assert!(accept(&anonymous, &config).is_some());
    }

    #[test]
    fn test_missing_manufacturer_data() {
        let raw = RawAdvertisement {
            local_name: None,
            manufacturer_data: HashMap::from([(0x004C, vec![0x02, 0x15])]),
            rssi: -40,
        };
        assert_eq!(
            evaluate(&raw, &FilterConfig::default()),
            Err(Rejection::MissingManufacturerData(LEGO_CID))
        );
    }

    #[test]
    fn test_malformed_is_rejection() {
        // Unknown tag 7
        let raw = advertisement(None, b"\x01\xe0", -40);
        assert!(matches!(
            evaluate(&raw, &FilterConfig::default()),
            Err(Rejection::Malformed(ProtocolError::MalformedMessage(_)))
        ));

        // Truncated string
        let raw = advertisement(None, b"\x01\xa4ab", -40);
        assert!(accept(&raw, &FilterConfig::default()).is_none());
    }

    #[test]
    fn test_channel_allow_list() {
        let config = FilterConfig {
            channels: vec![1, 2],
            ..Default::default()
        };

        let raw = advertisement(None, b"\x03\x00\x61\x05", -40);
        assert_eq!(
            evaluate(&raw, &config),
            Err(Rejection::ChannelNotObserved(3))
        );

        let raw = advertisement(None, b"\x02\x00\x61\x05", -40);
        assert_eq!(accept(&raw, &config).map(|o| o.channel), Some(2));
    }

    // -------------------------------------------------------------------------
    // Ordering
    // -------------------------------------------------------------------------

    #[test]
    fn test_name_checked_before_payload() {
        let raw = advertisement(Some("Phone"), b"\x01\xe0", -40);
        let config = FilterConfig {
            device_pattern: Some("Pybricks".into()),
            ..Default::default()
        };
        assert!(matches!(
            evaluate(&raw, &config),
            Err(Rejection::DeviceName(_))
        ));
    }

    mod proptest_tests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn test_weak_signal_always_rejected(
                payload in prop::collection::vec(any::<u8>(), 0..27),
                threshold in -100i16..0,
                below in 1i16..50,
            ) {
                let raw = advertisement(None, &payload, threshold - below);
                let config = FilterConfig {
                    rssi_threshold: Some(threshold),
                    ..Default::default()
                };
                let is_weak = matches!(
                    evaluate(&raw, &config),
                    Err(Rejection::WeakSignal { .. })
                );
                prop_assert!(is_weak);
            }

            #[test]
            fn test_accepted_channel_is_allowed(
                payload in prop::collection::vec(any::<u8>(), 1..27),
                channels in prop::collection::vec(any::<u8>(), 1..4),
            ) {
                let raw = advertisement(None, &payload, -40);
                let config = FilterConfig {
                    channels: channels.clone(),
                    ..Default::default()
                };
                if let Some(observation) = accept(&raw, &config) {
                    prop_assert!(channels.contains(&observation.channel));
                }
            }
        }
    }
}
