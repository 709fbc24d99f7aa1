//! Observe session
//!
//! An [`Observer`] scans for advertisements through a [`ScanTransport`],
//! runs each one through the [filter](crate::filter) and keeps the latest
//! accepted message per channel in an [`ObservationCache`]. Every accepted
//! message is also published on a broadcast channel.
//!
//! # Example
//!
//! ```rust,ignore
//! let observer = Observer::new(scanner, ObserverConfig {
//!     channels: vec![1, 2],
//!     ..Default::default()
//! });
//! observer.start().await?;
//!
//! let mut events = observer.subscribe();
//! while let Ok(observation) = events.recv().await {
//!     println!("{}: {:?}", observation.channel, observation.values);
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use pb_protocol::{DisplayValues, Value, LEGO_CID};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{ObservationCache, ObservedEntry};
use crate::config::ObserverConfig;
use crate::error::SessionError;
use crate::filter::{evaluate, FilterConfig, Observation};
use crate::transport::{
    DetectionCallback, DiscoveryFilter, OrPattern, RawAdvertisement, ScanRequest, ScanTransport,
    ScanningMode,
};

/// Capacity of the observation event channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// State shared with the detection callback
struct Shared {
    filter: FilterConfig,
    cache: Mutex<ObservationCache>,
    events: broadcast::Sender<Observation>,
}

impl Shared {
    fn handle(&self, raw: RawAdvertisement, now: Instant) {
        let observation = match evaluate(&raw, &self.filter) {
            Ok(observation) => observation,
            Err(rejection) => {
                debug!("Filtered advertisement: {}", rejection);
                return;
            }
        };

        info!(
            "Pybricks broadcast on channel {}: {}",
            observation.channel,
            DisplayValues(&observation.values)
        );
        self.cache.lock().insert(
            observation.channel,
            observation.values.clone(),
            observation.rssi,
            now,
        );
        // No subscribers is fine
        let _ = self.events.send(observation);
    }
}

/// Scans for broadcasts and caches the latest message per channel
pub struct Observer {
    config: ObserverConfig,
    scanner: Arc<dyn ScanTransport>,
    shared: Arc<Shared>,
    scanning: AtomicBool,
}

impl Observer {
    pub fn new(scanner: Arc<dyn ScanTransport>, config: ObserverConfig) -> Self {
        let cache = ObservationCache::for_channels(&config.channels, config.message_ttl());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            shared: Arc::new(Shared {
                filter: config.filter(),
                cache: Mutex::new(cache),
                events,
            }),
            config,
            scanner,
            scanning: AtomicBool::new(false),
        }
    }

    /// Observed channels (empty: all)
    pub fn channels(&self) -> &[u8] {
        &self.config.channels
    }

    pub fn config(&self) -> &ObserverConfig {
        &self.config
    }

    /// Scan request handed to the transport
    ///
    /// Passive scans match one pattern per channel, or the LEGO company ID
    /// alone when observing all channels. Active scans filter on RSSI and
    /// device name instead.
    pub fn scan_request(&self) -> ScanRequest {
        let cid = LEGO_CID.to_le_bytes();
        let or_patterns = if self.config.channels.is_empty() {
            vec![OrPattern::manufacturer_data(cid.to_vec())]
        } else {
            self.config
                .channels
                .iter()
                .map(|&channel| OrPattern::manufacturer_data(vec![cid[0], cid[1], channel]))
                .collect()
        };

        let discovery_filter = match self.config.scanning_mode {
            ScanningMode::Active => DiscoveryFilter {
                rssi: self.config.rssi_threshold,
                pattern: self.config.device_pattern.clone(),
                duplicate_data: true,
            },
            ScanningMode::Passive => DiscoveryFilter::default(),
        };

        ScanRequest {
            mode: self.config.scanning_mode,
            or_patterns,
            discovery_filter,
        }
    }

    /// Callback feeding received advertisements into this observer
    pub fn detection_callback(&self) -> DetectionCallback {
        let shared = self.shared.clone();
        Arc::new(move |raw: RawAdvertisement| shared.handle(raw, Instant::now()))
    }

    /// Start scanning
    pub async fn start(&self) -> Result<(), SessionError> {
        if self
            .scanning
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Observer already scanning");
            return Ok(());
        }

        info!(
            "Observing on channels {} ({} scanning)...",
            self.channel_list(),
            self.config.scanning_mode.name()
        );
        let started = self
            .scanner
            .start(self.scan_request(), self.detection_callback())
            .await;
        if let Err(e) = started {
            self.scanning.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        Ok(())
    }

    /// Stop scanning. Cached observations stay readable until they expire.
    pub async fn stop(&self) -> Result<(), SessionError> {
        if !self.scanning.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.scanner.stop().await?;
        debug!("Observer stopped");
        Ok(())
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    /// Latest unexpired observation on `channel`
    pub fn observe(&self, channel: u8) -> Option<ObservedEntry> {
        self.shared
            .cache
            .lock()
            .get(channel, Instant::now())
            .cloned()
    }

    /// Values of the latest unexpired observation on `channel`
    pub fn observe_values(&self, channel: u8) -> Option<Vec<Value>> {
        self.observe(channel).map(|entry| entry.values)
    }

    /// Receive every accepted observation from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Observation> {
        self.shared.events.subscribe()
    }

    fn channel_list(&self) -> String {
        if self.config.channels.is_empty() {
            "ALL".to_string()
        } else {
            format!("{:?}", self.config.channels)
        }
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        if !self.scanning.load(Ordering::SeqCst) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let scanner = self.scanner.clone();
                handle.spawn(async move {
                    if let Err(e) = scanner.stop().await {
                        warn!("Failed to stop scanning: {}", e);
                    }
                });
            }
            Err(_) => warn!("Observer dropped outside a runtime while scanning"),
        }
    }
}
