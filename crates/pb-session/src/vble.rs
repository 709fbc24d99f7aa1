//! Virtual hub radio
//!
//! [`VirtualBle`] mirrors the BLE interface of a Pybricks hub: one broadcast
//! channel, a set of observed channels and a version string. It is built
//! from a [`Broadcaster`] and an [`Observer`].
//!
//! # Example
//!
//! ```rust,ignore
//! let vble = VirtualBle::from_config(config, advertiser, scanner);
//! vble.open().await?;
//!
//! vble.broadcast(Some(vec![Value::Int(42), Value::Int(24)])).await?;
//! if let Some(values) = vble.observe(2) {
//!     println!("{:?} at {} dBm", values, vble.signal_strength(2));
//! }
//!
//! vble.close().await?;
//! ```

use std::sync::Arc;

use pb_protocol::Value;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::advertisement::BroadcastAdvertisement;
use crate::broadcaster::Broadcaster;
use crate::config::VirtualBleConfig;
use crate::error::SessionError;
use crate::filter::Observation;
use crate::observer::Observer;
use crate::transport::{AdvertisingTransport, ScanTransport};

/// Signal strength reported for a channel with no observation
pub const NO_SIGNAL: i16 = -128;

/// A virtual Pybricks hub radio
pub struct VirtualBle {
    broadcaster: Broadcaster,
    observer: Observer,
    advertisement: BroadcastAdvertisement,
    device_version: String,
}

impl VirtualBle {
    pub fn new(
        broadcaster: Broadcaster,
        observer: Observer,
        broadcast_channel: u8,
        device_version: impl Into<String>,
    ) -> Self {
        let advertisement = broadcaster.create_advertisement(broadcast_channel);
        Self {
            broadcaster,
            observer,
            advertisement,
            device_version: device_version.into(),
        }
    }

    /// Create a virtual hub from configuration
    pub fn from_config(
        config: VirtualBleConfig,
        advertiser: Arc<dyn AdvertisingTransport>,
        scanner: Arc<dyn ScanTransport>,
    ) -> Self {
        let broadcaster = Broadcaster::new(advertiser, config.device_name.clone());
        let observer = Observer::new(scanner, config.observer());
        Self::new(
            broadcaster,
            observer,
            config.broadcast_channel,
            config.device_version,
        )
    }

    /// Start observing
    pub async fn open(&self) -> Result<(), SessionError> {
        info!(
            "Opening virtual hub {} (broadcast channel {})",
            self.broadcaster.name(),
            self.broadcast_channel()
        );
        self.observer.start().await
    }

    /// Stop broadcasting and observing
    ///
    /// Both are stopped even if one fails. The broadcaster's error wins.
    pub async fn close(&self) -> Result<(), SessionError> {
        let broadcast = self.broadcaster.stop().await;
        let observe = self.observer.stop().await;
        debug!("Closed virtual hub {}", self.broadcaster.name());
        broadcast.and(observe)
    }

    /// Broadcast `data` on the broadcast channel
    ///
    /// `None` or an empty list stops broadcasting. Updating an active
    /// broadcast changes the payload in place. An oversized message fails
    /// with [`SessionError::Protocol`] and leaves the current broadcast as is.
    pub async fn broadcast(&self, data: Option<Vec<Value>>) -> Result<(), SessionError> {
        let values = match data {
            Some(values) if !values.is_empty() => values,
            _ => {
                if self.is_broadcasting() {
                    self.broadcaster.stop_broadcast(&self.advertisement).await?;
                }
                return Ok(());
            }
        };

        self.advertisement.set_message(&values)?;
        if !self.is_broadcasting() {
            self.broadcaster.broadcast(&self.advertisement).await?;
        }
        Ok(())
    }

    /// Values last received on `channel`, unless expired
    pub fn observe(&self, channel: u8) -> Option<Vec<Value>> {
        self.observer.observe_values(channel)
    }

    /// RSSI of the last message on `channel`, or [`NO_SIGNAL`]
    pub fn signal_strength(&self, channel: u8) -> i16 {
        self.observer
            .observe(channel)
            .map_or(NO_SIGNAL, |entry| entry.rssi)
    }

    pub fn version(&self) -> &str {
        &self.device_version
    }

    pub fn is_broadcasting(&self) -> bool {
        self.broadcaster.is_broadcasting(Some(&self.advertisement))
    }

    pub fn broadcast_channel(&self) -> u8 {
        self.advertisement.channel()
    }

    /// The advertisement used by [`broadcast`](Self::broadcast)
    pub fn advertisement(&self) -> &BroadcastAdvertisement {
        &self.advertisement
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn observer(&self) -> &Observer {
        &self.observer
    }

    /// Receive every accepted observation from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Observation> {
        self.observer.subscribe()
    }
}
