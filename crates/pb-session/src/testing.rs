//! In-memory transports for unit tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::advertisement::BroadcastAdvertisement;
use crate::transport::{
    AdvertisingTransport, DetectionCallback, RawAdvertisement, RegisterOptions, ScanRequest,
    ScanTransport, TransportError,
};

async fn wait_for(gate: &Mutex<Option<Arc<Semaphore>>>) {
    let gate = gate.lock().clone();
    if let Some(gate) = gate {
        let _permit = gate.acquire().await;
    }
}

/// Records exports and registrations, with injectable failures
#[derive(Default)]
pub(crate) struct MockAdvertiser {
    pub exported: Mutex<HashSet<String>>,
    pub registered: Mutex<HashMap<String, BroadcastAdvertisement>>,
    pub register_error: Mutex<Option<TransportError>>,
    pub unregister_error: Mutex<Option<TransportError>>,
    /// Registration never completes
    pub hang_register: AtomicBool,
    /// Registration waits for a permit
    pub register_gate: Mutex<Option<Arc<Semaphore>>>,
    /// Unregistration waits for a permit
    pub unregister_gate: Mutex<Option<Arc<Semaphore>>>,
    /// Release the advertisement from inside the register call
    pub release_on_register: AtomicBool,
    pub unregister_calls: AtomicUsize,
}

impl MockAdvertiser {
    pub fn is_exported(&self, path: &str) -> bool {
        self.exported.lock().contains(path)
    }

    pub fn is_registered(&self, path: &str) -> bool {
        self.registered.lock().contains_key(path)
    }

    /// Revoke a registration the way a transport timeout would
    pub fn revoke(&self, path: &str) {
        let adv = self.registered.lock().remove(path);
        if let Some(adv) = adv {
            adv.release();
        }
    }
}

#[async_trait]
impl AdvertisingTransport for MockAdvertiser {
    fn export(&self, adv: &BroadcastAdvertisement) -> Result<(), TransportError> {
        if self.exported.lock().insert(adv.path().to_string()) {
            Ok(())
        } else {
            Err(TransportError::AlreadyExists)
        }
    }

    fn unexport(&self, path: &str) {
        self.exported.lock().remove(path);
    }

    async fn register_advertisement(
        &self,
        adv: &BroadcastAdvertisement,
        _options: &RegisterOptions,
    ) -> Result<(), TransportError> {
        if self.hang_register.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        wait_for(&self.register_gate).await;
        if let Some(err) = self.register_error.lock().take() {
            return Err(err);
        }
        {
            let mut registered = self.registered.lock();
            if registered.contains_key(adv.path()) {
                return Err(TransportError::AlreadyExists);
            }
            registered.insert(adv.path().to_string(), adv.clone());
        }
        if self.release_on_register.load(Ordering::SeqCst) {
            self.revoke(adv.path());
        }
        Ok(())
    }

    async fn unregister_advertisement(&self, path: &str) -> Result<(), TransportError> {
        self.unregister_calls.fetch_add(1, Ordering::SeqCst);
        wait_for(&self.unregister_gate).await;
        if let Some(err) = self.unregister_error.lock().take() {
            return Err(err);
        }
        self.registered
            .lock()
            .remove(path)
            .map(|_| ())
            .ok_or(TransportError::NotFound)
    }

    async fn active_instances(&self) -> Result<u8, TransportError> {
        Ok(self.registered.lock().len() as u8)
    }

    async fn supported_instances(&self) -> Result<u8, TransportError> {
        Ok(16)
    }
}

/// Captures the scan request and lets tests inject advertisements
#[derive(Default)]
pub(crate) struct MockScanner {
    pub request: Mutex<Option<ScanRequest>>,
    pub callback: Mutex<Option<DetectionCallback>>,
    pub start_error: Mutex<Option<TransportError>>,
    /// Scan start waits for a permit
    pub start_gate: Mutex<Option<Arc<Semaphore>>>,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
}

impl MockScanner {
    pub fn deliver(&self, raw: RawAdvertisement) {
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback(raw);
        }
    }
}

#[async_trait]
impl ScanTransport for MockScanner {
    async fn start(
        &self,
        request: ScanRequest,
        callback: DetectionCallback,
    ) -> Result<(), TransportError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        wait_for(&self.start_gate).await;
        if let Some(err) = self.start_error.lock().take() {
            return Err(err);
        }
        *self.request.lock() = Some(request);
        *self.callback.lock() = Some(callback);
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.callback.lock().take();
        Ok(())
    }
}
