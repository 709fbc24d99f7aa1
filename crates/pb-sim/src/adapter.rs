//! Simulated BLE adapter
//!
//! A [`SimAdapter`] is one virtual controller on a [`SimulatedAir`]. It can
//! advertise and scan at the same time, and validates registrations the way
//! the BlueZ advertising manager does.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use pb_protocol::MAX_ADVERTISING_DATA_LEN;
use pb_session::{
    AdvertisingTransport, BroadcastAdvertisement, DetectionCallback, RegisterOptions,
    ScanRequest, ScanTransport, TransportError,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::air::{AdapterId, SimulatedAir};

/// Default transmit signal strength in dBm
pub const DEFAULT_TX_RSSI: i16 = -60;

/// Default number of advertising instances per adapter
pub const DEFAULT_MAX_INSTANCES: u8 = 4;

/// Configuration for creating a simulated adapter
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SimAdapterConfig {
    /// RSSI reported to observers of this adapter's advertisements
    pub tx_rssi: i16,
    /// Advertising instances the controller supports
    pub max_instances: u8,
}

impl Default for SimAdapterConfig {
    fn default() -> Self {
        Self {
            tx_rssi: DEFAULT_TX_RSSI,
            max_instances: DEFAULT_MAX_INSTANCES,
        }
    }
}

/// A virtual BLE controller
pub struct SimAdapter {
    id: AdapterId,
    name: String,
    air: SimulatedAir,
    max_instances: u8,
    exported: Mutex<HashMap<String, BroadcastAdvertisement>>,
    fail_next_register: Mutex<Option<TransportError>>,
    fail_next_unregister: Mutex<Option<TransportError>>,
}

impl SimAdapter {
    pub(crate) fn new(
        id: AdapterId,
        name: String,
        air: SimulatedAir,
        config: SimAdapterConfig,
    ) -> Self {
        Self {
            id,
            name,
            air,
            max_instances: config.max_instances,
            exported: Mutex::new(HashMap::new()),
            fail_next_register: Mutex::new(None),
            fail_next_unregister: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Change the RSSI observers see for this adapter
    pub fn set_tx_rssi(&self, rssi: i16) {
        self.air.set_tx_rssi(self.id, rssi);
    }

    /// Make the next registration fail with `err`
    pub fn fail_next_register(&self, err: TransportError) {
        *self.fail_next_register.lock() = Some(err);
    }

    /// Make the next unregistration fail with `err`
    pub fn fail_next_unregister(&self, err: TransportError) {
        *self.fail_next_unregister.lock() = Some(err);
    }

    pub fn is_exported(&self, path: &str) -> bool {
        self.exported.lock().contains_key(path)
    }

    pub fn is_registered(&self, path: &str) -> bool {
        self.air.is_registered(self.id, path)
    }

    /// This adapter as both transports
    pub fn transports(self: &Arc<Self>) -> (Arc<dyn AdvertisingTransport>, Arc<dyn ScanTransport>) {
        (self.clone(), self.clone())
    }
}

impl Drop for SimAdapter {
    fn drop(&mut self) {
        self.air.detach(self.id);
    }
}

#[async_trait]
impl AdvertisingTransport for SimAdapter {
    fn export(&self, adv: &BroadcastAdvertisement) -> Result<(), TransportError> {
        let mut exported = self.exported.lock();
        if exported.contains_key(adv.path()) {
            return Err(TransportError::AlreadyExists);
        }
        exported.insert(adv.path().to_string(), adv.clone());
        Ok(())
    }

    fn unexport(&self, path: &str) {
        self.exported.lock().remove(path);
    }

    async fn register_advertisement(
        &self,
        adv: &BroadcastAdvertisement,
        options: &RegisterOptions,
    ) -> Result<(), TransportError> {
        if let Some(err) = self.fail_next_register.lock().take() {
            debug!("{}: injected register failure: {}", self.name, err);
            return Err(err);
        }

        if !self.is_exported(adv.path()) {
            return Err(TransportError::InvalidArguments(format!(
                "{} is not exported",
                adv.path()
            )));
        }
        if self.air.is_registered(self.id, adv.path()) {
            return Err(TransportError::AlreadyExists);
        }
        if adv.properties().advertising_data_len() > MAX_ADVERTISING_DATA_LEN {
            return Err(TransportError::InvalidLength);
        }
        if self.air.registered_count(self.id) >= self.max_instances as usize {
            return Err(TransportError::NotPermitted);
        }

        if !options.is_empty() {
            debug!("{}: ignoring register options {:?}", self.name, options);
        }
        info!("{}: registered {}", self.name, adv);
        self.air.register(self.id, adv);
        Ok(())
    }

    async fn unregister_advertisement(&self, path: &str) -> Result<(), TransportError> {
        if let Some(err) = self.fail_next_unregister.lock().take() {
            debug!("{}: injected unregister failure: {}", self.name, err);
            return Err(err);
        }

        if self.air.unregister(self.id, path) {
            info!("{}: unregistered {}", self.name, path);
            Ok(())
        } else {
            Err(TransportError::NotFound)
        }
    }

    async fn active_instances(&self) -> Result<u8, TransportError> {
        Ok(self.air.registered_count(self.id).min(u8::MAX as usize) as u8)
    }

    async fn supported_instances(&self) -> Result<u8, TransportError> {
        Ok(self.max_instances)
    }
}

#[async_trait]
impl ScanTransport for SimAdapter {
    async fn start(
        &self,
        request: ScanRequest,
        callback: DetectionCallback,
    ) -> Result<(), TransportError> {
        debug!(
            "{}: start {} scan with {} patterns",
            self.name,
            request.mode.name(),
            request.or_patterns.len()
        );
        if self.air.start_scan(self.id, request, callback) {
            Ok(())
        } else {
            Err(TransportError::Failed("scan already in progress".into()))
        }
    }

    async fn stop(&self) -> Result<(), TransportError> {
        debug!("{}: stop scan", self.name);
        self.air.stop_scan(self.id);
        Ok(())
    }
}
