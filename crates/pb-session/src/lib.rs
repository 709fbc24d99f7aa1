//! Broadcast and observe sessions for Pybricks BLE messages
//!
//! This crate implements the two roles of connectionless hub messaging on
//! top of [`pb_protocol`]:
//!
//! - [`Broadcaster`] registers [`BroadcastAdvertisement`]s with an
//!   [`AdvertisingTransport`] and tracks which ones are active
//! - [`Observer`] scans through a [`ScanTransport`], filters received
//!   advertisements and caches the latest message per channel
//! - [`VirtualBle`] combines both into the BLE interface of a hub
//!
//! # Architecture
//!
//! ```text
//! values -> encode -> BroadcastAdvertisement -> AdvertisingTransport
//! ScanTransport -> filter -> decode -> ObservationCache -> observe()
//!                                   \-> broadcast::Sender<Observation>
//! ```
//!
//! Transports may invoke callbacks from any thread. The active set and the
//! cache are guarded by `parking_lot` mutexes that are never held across an
//! `.await`.

pub mod advertisement;
pub mod broadcaster;
pub mod cache;
pub mod config;
pub mod error;
pub mod filter;
pub mod observer;
pub mod transport;
pub mod vble;

#[cfg(test)]
mod testing;

pub use advertisement::{
    AdvertisementProperties, AdvertisingType, BroadcastAdvertisement, ReleaseCallback,
};
pub use broadcaster::Broadcaster;
pub use cache::{ObservationCache, ObservedEntry, DEFAULT_MESSAGE_TTL};
pub use config::{ObserverConfig, VirtualBleConfig};
pub use error::SessionError;
pub use filter::{accept, evaluate, FilterConfig, Observation, Rejection};
pub use observer::Observer;
pub use transport::{
    AdvertisingTransport, DetectionCallback, DiscoveryFilter, OrPattern, RawAdvertisement,
    RegisterOptions, ScanRequest, ScanTransport, ScanningMode, TransportError,
    AD_TYPE_MANUFACTURER_SPECIFIC_DATA,
};
pub use vble::{VirtualBle, NO_SIGNAL};
