//! Shared radio medium
//!
//! The air keeps every adapter's scan session and registered advertisement.
//! Each registration runs a task that retransmits the advertisement whenever
//! its properties change and releases it when its timeout elapses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pb_session::{
    AdvertisementProperties, BroadcastAdvertisement, DetectionCallback, RawAdvertisement,
    ScanRequest, ScanningMode, AD_TYPE_MANUFACTURER_SPECIFIC_DATA,
};
use tokio::sync::oneshot;
use tracing::{debug, info, trace};

use crate::adapter::{SimAdapter, SimAdapterConfig};

pub(crate) type AdapterId = usize;

struct AdapterInfo {
    name: String,
    tx_rssi: i16,
}

struct ScanSession {
    request: ScanRequest,
    callback: DetectionCallback,
}

struct ActiveBroadcast {
    adv: BroadcastAdvertisement,
    /// Dropping the sender stops the retransmit task
    _cancel: oneshot::Sender<()>,
}

#[derive(Default)]
struct AirState {
    next_id: AdapterId,
    adapters: HashMap<AdapterId, AdapterInfo>,
    scanners: HashMap<AdapterId, ScanSession>,
    broadcasts: HashMap<(AdapterId, String), ActiveBroadcast>,
}

/// In-memory BLE medium shared by simulated adapters
///
/// Cloning yields another handle to the same medium.
#[derive(Clone, Default)]
pub struct SimulatedAir {
    state: Arc<Mutex<AirState>>,
}

impl SimulatedAir {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new adapter with default settings
    pub fn adapter(&self, name: impl Into<String>) -> Arc<SimAdapter> {
        self.adapter_with_config(name, SimAdapterConfig::default())
    }

    /// Attach a new adapter
    pub fn adapter_with_config(
        &self,
        name: impl Into<String>,
        config: SimAdapterConfig,
    ) -> Arc<SimAdapter> {
        let name = name.into();
        let id = {
            let mut state = self.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.adapters.insert(
                id,
                AdapterInfo {
                    name: name.clone(),
                    tx_rssi: config.tx_rssi,
                },
            );
            id
        };
        debug!("Adapter {} attached to the air", name);
        Arc::new(SimAdapter::new(id, name, self.clone(), config))
    }

    /// Number of advertisements currently on the air
    pub fn broadcast_count(&self) -> usize {
        self.state.lock().broadcasts.len()
    }

    /// Number of adapters currently scanning
    pub fn scanner_count(&self) -> usize {
        self.state.lock().scanners.len()
    }

    pub(crate) fn detach(&self, id: AdapterId) {
        let removed: Vec<ActiveBroadcast> = {
            let mut state = self.state.lock();
            state.adapters.remove(&id);
            state.scanners.remove(&id);
            let keys: Vec<_> = state
                .broadcasts
                .keys()
                .filter(|(owner, _)| *owner == id)
                .cloned()
                .collect();
            keys.iter()
                .filter_map(|key| state.broadcasts.remove(key))
                .collect()
        };
        drop(removed);
    }

    pub(crate) fn set_tx_rssi(&self, id: AdapterId, rssi: i16) {
        if let Some(info) = self.state.lock().adapters.get_mut(&id) {
            info.tx_rssi = rssi;
        }
    }

    pub(crate) fn is_registered(&self, id: AdapterId, path: &str) -> bool {
        self.state
            .lock()
            .broadcasts
            .contains_key(&(id, path.to_string()))
    }

    pub(crate) fn registered_count(&self, id: AdapterId) -> usize {
        self.state
            .lock()
            .broadcasts
            .keys()
            .filter(|(owner, _)| *owner == id)
            .count()
    }

    /// Put `adv` on the air and start its retransmit task
    pub(crate) fn register(&self, owner: AdapterId, adv: &BroadcastAdvertisement) {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let props_rx = adv.subscribe();
        let props = props_rx.borrow().clone();

        self.state.lock().broadcasts.insert(
            (owner, adv.path().to_string()),
            ActiveBroadcast {
                adv: adv.clone(),
                _cancel: cancel_tx,
            },
        );
        self.transmit(owner, &props, None);

        tokio::spawn(run_broadcast(
            self.clone(),
            owner,
            adv.clone(),
            props_rx,
            cancel_rx,
        ));
    }

    /// Take `path` off the air. Returns false if it was not registered.
    pub(crate) fn unregister(&self, owner: AdapterId, path: &str) -> bool {
        let removed = self
            .state
            .lock()
            .broadcasts
            .remove(&(owner, path.to_string()));
        removed.is_some()
    }

    pub(crate) fn start_scan(
        &self,
        id: AdapterId,
        request: ScanRequest,
        callback: DetectionCallback,
    ) -> bool {
        let pending: Vec<(AdapterId, AdvertisementProperties)> = {
            let mut state = self.state.lock();
            if state.scanners.contains_key(&id) {
                return false;
            }
            state.scanners.insert(id, ScanSession { request, callback });
            state
                .broadcasts
                .iter()
                .filter(|((owner, _), _)| *owner != id)
                .map(|((owner, _), active)| (*owner, active.adv.properties()))
                .collect()
        };

        // Advertisements already on the air
        for (owner, props) in pending {
            self.transmit(owner, &props, Some(id));
        }
        true
    }

    pub(crate) fn stop_scan(&self, id: AdapterId) {
        self.state.lock().scanners.remove(&id);
    }

    /// Deliver `props` from `owner` to matching scanners, or only to `target`
    fn transmit(&self, owner: AdapterId, props: &AdvertisementProperties, target: Option<AdapterId>) {
        let deliveries: Vec<(DetectionCallback, RawAdvertisement)> = {
            let state = self.state.lock();
            let Some(sender) = state.adapters.get(&owner) else {
                return;
            };
            state
                .scanners
                .iter()
                .filter(|(id, _)| **id != owner && target.map_or(true, |t| t == **id))
                .filter_map(|(id, scan)| {
                    let raw = received(sender, props, scan.request.mode);
                    if matches_request(&scan.request, &raw) {
                        trace!("{} -> adapter {}: {:?}", sender.name, id, raw);
                        Some((scan.callback.clone(), raw))
                    } else {
                        None
                    }
                })
                .collect()
        };

        for (callback, raw) in deliveries {
            callback(raw);
        }
    }
}

/// What a scanner sees of an advertisement
///
/// Active scanners also receive the scan response, which carries the
/// sender's name when the advertisement itself has none.
fn received(sender: &AdapterInfo, props: &AdvertisementProperties, mode: ScanningMode) -> RawAdvertisement {
    let local_name = match mode {
        ScanningMode::Passive => props.local_name.clone(),
        ScanningMode::Active => props
            .local_name
            .clone()
            .or_else(|| Some(sender.name.clone())),
    };

    RawAdvertisement {
        local_name,
        manufacturer_data: props
            .manufacturer_data
            .iter()
            .map(|(cid, data)| (*cid, data.clone()))
            .collect(),
        rssi: sender.tx_rssi,
    }
}

/// Controller-side filtering of a scan request
fn matches_request(request: &ScanRequest, raw: &RawAdvertisement) -> bool {
    match request.mode {
        ScanningMode::Passive => {
            request.or_patterns.is_empty()
                || request.or_patterns.iter().any(|pattern| {
                    raw.manufacturer_data.iter().any(|(cid, data)| {
                        let mut ad = cid.to_le_bytes().to_vec();
                        ad.extend_from_slice(data);
                        pattern.matches(AD_TYPE_MANUFACTURER_SPECIFIC_DATA, &ad)
                    })
                })
        }
        ScanningMode::Active => {
            let filter = &request.discovery_filter;
            let strong_enough = filter.rssi.map_or(true, |min| raw.rssi >= min);
            let name_matches = filter.pattern.as_ref().map_or(true, |pattern| {
                raw.local_name
                    .as_deref()
                    .is_some_and(|name| name.starts_with(pattern.as_str()))
            });
            strong_enough && name_matches
        }
    }
}

/// Retransmit on change until cancelled or timed out
async fn run_broadcast(
    air: SimulatedAir,
    owner: AdapterId,
    adv: BroadcastAdvertisement,
    mut props_rx: tokio::sync::watch::Receiver<AdvertisementProperties>,
    mut cancel: oneshot::Receiver<()>,
) {
    let timeout = adv.timeout();
    let expiry = async move {
        match timeout {
            Some(seconds) => tokio::time::sleep(Duration::from_secs(seconds.into())).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(expiry);

    loop {
        tokio::select! {
            changed = props_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let props = props_rx.borrow_and_update().clone();
                air.transmit(owner, &props, None);
            }
            _ = &mut expiry => {
                if air.unregister(owner, adv.path()) {
                    info!("Advertisement {} timed out", adv.path());
                    adv.release();
                }
                break;
            }
            _ = &mut cancel => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use pb_session::{DiscoveryFilter, OrPattern};

    use super::*;

    fn sender() -> AdapterInfo {
        AdapterInfo {
            name: "hci0".into(),
            tx_rssi: -60,
        }
    }

    fn props(payload: &[u8]) -> AdvertisementProperties {
        AdvertisementProperties {
            manufacturer_data: BTreeMap::from([(0x0397, payload.to_vec())]),
            ..Default::default()
        }
    }

    #[test]
    fn test_passive_pattern_matching() {
        let request = ScanRequest {
            or_patterns: vec![OrPattern::manufacturer_data(vec![0x97, 0x03, 0x01])],
            ..Default::default()
        };

        let on_channel = received(&sender(), &props(b"\x01\x00\x61\x05"), ScanningMode::Passive);
        assert!(matches_request(&request, &on_channel));

        let other_channel = received(&sender(), &props(b"\x02\x00\x61\x05"), ScanningMode::Passive);
        assert!(!matches_request(&request, &other_channel));
    }

    #[test]
    fn test_passive_hides_name() {
        let raw = received(&sender(), &props(b"\x01\x20"), ScanningMode::Passive);
        assert_eq!(raw.local_name, None);
        assert_eq!(raw.rssi, -60);

        let raw = received(&sender(), &props(b"\x01\x20"), ScanningMode::Active);
        assert_eq!(raw.local_name.as_deref(), Some("hci0"));
    }

    #[test]
    fn test_active_discovery_filter() {
        let raw = received(&sender(), &props(b"\x01\x20"), ScanningMode::Active);

        let mut request = ScanRequest {
            mode: ScanningMode::Active,
            discovery_filter: DiscoveryFilter {
                rssi: Some(-70),
                pattern: Some("hci".into()),
                duplicate_data: true,
            },
            ..Default::default()
        };
        assert!(matches_request(&request, &raw));

        request.discovery_filter.rssi = Some(-50);
        assert!(!matches_request(&request, &raw));

        request.discovery_filter.rssi = None;
        request.discovery_filter.pattern = Some("Pybricks".into());
        assert!(!matches_request(&request, &raw));
    }

    mod proptest_tests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn test_channel_pattern_matches_only_its_channel(
                watched in any::<u8>(),
                sent in any::<u8>(),
                rest in prop::collection::vec(any::<u8>(), 0..25),
            ) {
                let mut payload = vec![sent];
                payload.extend(rest);
                let request = ScanRequest {
                    or_patterns: vec![OrPattern::manufacturer_data(vec![0x97, 0x03, watched])],
                    ..Default::default()
                };
                let raw = received(&sender(), &props(&payload), ScanningMode::Passive);
                prop_assert_eq!(matches_request(&request, &raw), watched == sent);
            }
        }
    }
}
