//! Session configuration
//!
//! Both structs deserialize from JSON with every field optional, so a
//! config file only needs the settings that differ from the defaults.

use std::time::Duration;

use pb_protocol::LEGO_CID;
use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_MESSAGE_TTL;
use crate::filter::FilterConfig;
use crate::transport::ScanningMode;

/// Observer settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ObserverConfig {
    /// Channels to observe (empty: all)
    pub channels: Vec<u8>,
    /// Minimum RSSI in dBm
    pub rssi_threshold: Option<i16>,
    /// Only accept hubs whose name starts with this prefix
    pub device_pattern: Option<String>,
    /// Seconds an observed message stays readable
    pub message_ttl_secs: u64,
    pub scanning_mode: ScanningMode,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            rssi_threshold: None,
            device_pattern: None,
            message_ttl_secs: DEFAULT_MESSAGE_TTL.as_secs(),
            scanning_mode: ScanningMode::Passive,
        }
    }
}

impl ObserverConfig {
    pub fn message_ttl(&self) -> Duration {
        Duration::from_secs(self.message_ttl_secs)
    }

    /// Filter settings derived from this config
    pub fn filter(&self) -> FilterConfig {
        FilterConfig {
            rssi_threshold: self.rssi_threshold,
            device_pattern: self.device_pattern.clone(),
            manufacturer_id: LEGO_CID,
            channels: self.channels.clone(),
        }
    }
}

/// Virtual hub settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VirtualBleConfig {
    /// Local name used in advertisement paths
    pub device_name: String,
    /// Channel used by `broadcast`
    pub broadcast_channel: u8,
    /// Channels available to `observe` (empty: all)
    pub observe_channels: Vec<u8>,
    pub scanning_mode: ScanningMode,
    /// Only observe hubs whose name starts with this prefix
    pub device_filter: Option<String>,
    /// Returned by `version`
    pub device_version: String,
    /// Minimum RSSI in dBm
    pub rssi_threshold: Option<i16>,
    /// Seconds an observed message stays readable
    pub message_ttl_secs: u64,
}

/// Default local name of a virtual hub
pub const DEFAULT_DEVICE_NAME: &str = "pb_vhub";

/// Default version string of a virtual hub
pub const DEFAULT_DEVICE_VERSION: &str = "1.0";

impl Default for VirtualBleConfig {
    fn default() -> Self {
        Self {
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            broadcast_channel: 0,
            observe_channels: Vec::new(),
            scanning_mode: ScanningMode::Passive,
            device_filter: None,
            device_version: DEFAULT_DEVICE_VERSION.to_string(),
            rssi_threshold: None,
            message_ttl_secs: DEFAULT_MESSAGE_TTL.as_secs(),
        }
    }
}

impl VirtualBleConfig {
    /// Observer settings for this hub
    pub fn observer(&self) -> ObserverConfig {
        ObserverConfig {
            channels: self.observe_channels.clone(),
            rssi_threshold: self.rssi_threshold,
            device_pattern: self.device_filter.clone(),
            message_ttl_secs: self.message_ttl_secs,
            scanning_mode: self.scanning_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = VirtualBleConfig::default();
        assert_eq!(config.device_name, "pb_vhub");
        assert_eq!(config.broadcast_channel, 0);
        assert_eq!(config.device_version, "1.0");
        assert_eq!(config.scanning_mode, ScanningMode::Passive);
        assert_eq!(config.observer().message_ttl(), Duration::from_secs(60));
    }

    #[test]
    fn test_partial_json() {
        let config: VirtualBleConfig = serde_json::from_str(
            r#"{"broadcast_channel": 2, "observe_channels": [1, 3], "scanning_mode": "active"}"#,
        )
        .unwrap();

        assert_eq!(config.broadcast_channel, 2);
        assert_eq!(config.device_name, "pb_vhub");

        let observer = config.observer();
        assert_eq!(observer.channels, vec![1, 3]);
        assert_eq!(observer.scanning_mode, ScanningMode::Active);
    }

    #[test]
    fn test_filter_from_observer() {
        let config = ObserverConfig {
            channels: vec![4],
            rssi_threshold: Some(-70),
            device_pattern: Some("Pybricks".into()),
            ..Default::default()
        };
        let filter = config.filter();
        assert_eq!(filter.manufacturer_id, LEGO_CID);
        assert_eq!(filter.rssi_threshold, Some(-70));
        assert_eq!(filter.channels, vec![4]);
    }

    #[test]
    fn test_roundtrip_json() {
        let config = VirtualBleConfig {
            device_filter: Some("hub".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: VirtualBleConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
