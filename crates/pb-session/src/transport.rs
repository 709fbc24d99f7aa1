//! Transport boundary
//!
//! The session layer never talks to a Bluetooth stack directly. It drives two
//! capability traits instead: [`AdvertisingTransport`] for outgoing
//! advertisements and [`ScanTransport`] for incoming ones. A BlueZ/D-Bus
//! binding, a vendor SDK or the `pb-sim` medium implement them.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::advertisement::BroadcastAdvertisement;

/// AD type of manufacturer specific data
pub const AD_TYPE_MANUFACTURER_SPECIFIC_DATA: u8 = 0xFF;

/// Errors reported by a transport
///
/// The first five mirror the errors of the BlueZ advertising manager.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Object does not exist (safe to ignore when unregistering)
    #[error("does not exist")]
    NotFound,

    /// Rejected advertisement properties
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// Object is already registered or exported
    #[error("already exists")]
    AlreadyExists,

    /// Advertising data does not fit the advertisement
    #[error("invalid length")]
    InvalidLength,

    /// Operation not permitted (e.g. no free advertising instance)
    #[error("not permitted")]
    NotPermitted,

    /// Any other transport failure
    #[error("transport failure: {0}")]
    Failed(String),
}

/// BLE scanning mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanningMode {
    /// Relies on controller-side filtering with [`OrPattern`]s.
    /// Recommended, but not supported by all adapters.
    #[default]
    Passive,
    /// Sends scan requests and filters with a [`DiscoveryFilter`].
    /// Well supported, costs nearby devices power.
    Active,
}

impl ScanningMode {
    pub fn name(&self) -> &'static str {
        match self {
            ScanningMode::Passive => "passive",
            ScanningMode::Active => "active",
        }
    }
}

/// Advertisement monitor pattern used for passive scanning
///
/// Matches when the AD structure of type `ad_type` contains `content`
/// starting at `start_position`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrPattern {
    pub start_position: u8,
    pub ad_type: u8,
    pub content: Vec<u8>,
}

impl OrPattern {
    /// Pattern on manufacturer specific data (company ID first, little-endian)
    pub fn manufacturer_data(content: Vec<u8>) -> Self {
        Self {
            start_position: 0,
            ad_type: AD_TYPE_MANUFACTURER_SPECIFIC_DATA,
            content,
        }
    }

    /// Check an AD structure against this pattern
    pub fn matches(&self, ad_type: u8, data: &[u8]) -> bool {
        let start = self.start_position as usize;
        ad_type == self.ad_type
            && data
                .get(start..start + self.content.len())
                .is_some_and(|window| window == self.content.as_slice())
    }
}

/// Discovery filter applied by the transport when scanning actively
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiscoveryFilter {
    /// Minimum RSSI in dBm
    pub rssi: Option<i16>,
    /// Prefix the device name or address must start with
    pub pattern: Option<String>,
    /// Report every advertisement, not only changed ones
    pub duplicate_data: bool,
}

/// Everything a scan transport needs to start scanning
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanRequest {
    pub mode: ScanningMode,
    pub or_patterns: Vec<OrPattern>,
    pub discovery_filter: DiscoveryFilter,
}

/// An advertisement as received by a scan transport
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawAdvertisement {
    /// Local name, often absent with passive scanning
    pub local_name: Option<String>,
    /// Manufacturer specific data keyed by company ID
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    /// Received signal strength in dBm
    pub rssi: i16,
}

/// Extra options passed on registration, keyed by option name
///
/// BlueZ currently defines none; transports ignore keys they do not know.
pub type RegisterOptions = BTreeMap<String, String>;

/// Called by a scan transport for every received advertisement
pub type DetectionCallback = Arc<dyn Fn(RawAdvertisement) + Send + Sync>;

/// Registers and unregisters outgoing advertisements
///
/// A transport that revokes an advertisement on its own (e.g. because its
/// timeout elapsed) must call [`BroadcastAdvertisement::release`].
#[async_trait]
pub trait AdvertisingTransport: Send + Sync {
    /// Make the advertisement object reachable by the transport
    fn export(&self, adv: &BroadcastAdvertisement) -> Result<(), TransportError>;

    /// Tear down an export. Unknown paths are ignored.
    fn unexport(&self, path: &str);

    /// Start advertising an exported advertisement
    async fn register_advertisement(
        &self,
        adv: &BroadcastAdvertisement,
        options: &RegisterOptions,
    ) -> Result<(), TransportError>;

    /// Stop advertising the advertisement at `path`
    async fn unregister_advertisement(&self, path: &str) -> Result<(), TransportError>;

    /// Number of advertising instances currently in use
    async fn active_instances(&self) -> Result<u8, TransportError>;

    /// Number of advertising instances the controller supports
    async fn supported_instances(&self) -> Result<u8, TransportError>;
}

/// Delivers received advertisements
#[async_trait]
pub trait ScanTransport: Send + Sync {
    /// Start scanning, invoking `callback` per received advertisement
    async fn start(
        &self,
        request: ScanRequest,
        callback: DetectionCallback,
    ) -> Result<(), TransportError>;

    /// Stop scanning
    async fn stop(&self) -> Result<(), TransportError>;
}
