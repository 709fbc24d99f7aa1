//! Broadcast advertisement handle
//!
//! A [`BroadcastAdvertisement`] is one outgoing advertisement, identified by
//! a path of the form `/org/bluez/{local_name}/advertisement{index:03}`. The
//! index doubles as the broadcast channel of the carried message.
//!
//! Properties live in a `tokio::sync::watch` channel. Transports subscribe to
//! it so that a message update reaches the air without re-registering.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use pb_protocol::{
    decode_message, encode_message, DisplayValues, ProtocolError, Value, LEGO_CID,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

/// User callback invoked with the path of a released advertisement
pub type ReleaseCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Session bookkeeping run on release, before the user callback
pub(crate) type ReleaseHook = Box<dyn FnOnce(&str) + Send>;

/// Advertising type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdvertisingType {
    /// Non-connectable broadcast
    #[default]
    Broadcast,
    /// Connectable peripheral
    Peripheral,
}

/// Properties of an advertisement as seen by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementProperties {
    pub kind: AdvertisingType,
    /// Included in the advertising data when set
    pub local_name: Option<String>,
    /// Manufacturer specific data keyed by company ID
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,
    /// Seconds until the transport releases the advertisement (None: never)
    pub timeout: Option<u16>,
    /// Seconds per rotation slot when several advertisements are active
    pub duration: Option<u16>,
    /// Minimum advertising interval in milliseconds
    pub min_interval: Option<u32>,
    /// Maximum advertising interval in milliseconds
    pub max_interval: Option<u32>,
    /// Requested transmit power in dBm
    pub tx_power: Option<i16>,
}

impl AdvertisementProperties {
    /// Defaults for a non-connectable broadcast
    pub fn broadcast() -> Self {
        Self {
            kind: AdvertisingType::Broadcast,
            local_name: None,
            manufacturer_data: BTreeMap::new(),
            timeout: None,
            duration: None,
            min_interval: Some(100),
            max_interval: Some(1000),
            tx_power: Some(7),
        }
    }

    /// Size of the advertising data built from these properties
    ///
    /// Each manufacturer entry is an AD structure of length, type and
    /// company ID followed by the payload. The local name adds length and
    /// type bytes.
    pub fn advertising_data_len(&self) -> usize {
        let manufacturer: usize = self
            .manufacturer_data
            .values()
            .map(|data| 4 + data.len())
            .sum();
        let name = self.local_name.as_ref().map_or(0, |name| 2 + name.len());
        manufacturer + name
    }
}

impl Default for AdvertisementProperties {
    fn default() -> Self {
        Self::broadcast()
    }
}

struct Inner {
    path: String,
    local_name: String,
    index: u8,
    properties: watch::Sender<AdvertisementProperties>,
    on_release: Mutex<ReleaseCallback>,
    release_hook: Mutex<Option<ReleaseHook>>,
}

/// Handle to a broadcast advertisement
///
/// Cloning is cheap and every clone refers to the same advertisement.
#[derive(Clone)]
pub struct BroadcastAdvertisement {
    inner: Arc<Inner>,
}

impl BroadcastAdvertisement {
    /// Create an advertisement for `local_name` on channel `index`
    pub fn new(local_name: impl Into<String>, index: u8) -> Self {
        let local_name = local_name.into();
        let path = format!("/org/bluez/{}/advertisement{:03}", local_name, index);
        let (properties, _) = watch::channel(AdvertisementProperties::broadcast());
        let on_release: ReleaseCallback = Arc::new(|_: &str| {});

        Self {
            inner: Arc::new(Inner {
                path,
                local_name,
                index,
                properties,
                on_release: Mutex::new(on_release),
                release_hook: Mutex::new(None),
            }),
        }
    }

    /// Builder-style variant of [`set_on_release`](Self::set_on_release)
    pub fn with_on_release(self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.set_on_release(callback);
        self
    }

    /// Replace the callback invoked when the transport releases this advertisement
    pub fn set_on_release(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        *self.inner.on_release.lock() = Arc::new(callback);
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn local_name(&self) -> &str {
        &self.inner.local_name
    }

    pub fn index(&self) -> u8 {
        self.inner.index
    }

    /// Broadcast channel of the carried message
    pub fn channel(&self) -> u8 {
        self.inner.index
    }

    /// Snapshot of the current properties
    pub fn properties(&self) -> AdvertisementProperties {
        self.inner.properties.borrow().clone()
    }

    /// Watch property changes
    pub fn subscribe(&self) -> watch::Receiver<AdvertisementProperties> {
        self.inner.properties.subscribe()
    }

    /// Modify properties in place, notifying subscribers
    pub fn update_properties(&self, modify: impl FnOnce(&mut AdvertisementProperties)) {
        self.inner.properties.send_modify(modify);
    }

    /// Release the advertisement after `seconds`. Zero disables the timeout.
    pub fn set_timeout(&self, seconds: u16) {
        self.update_properties(|props| props.timeout = (seconds > 0).then_some(seconds));
    }

    pub fn timeout(&self) -> Option<u16> {
        self.inner.properties.borrow().timeout
    }

    /// Values of the carried message, if one is set
    pub fn message(&self) -> Option<Vec<Value>> {
        let props = self.inner.properties.borrow();
        let data = props.manufacturer_data.get(&LEGO_CID)?;
        decode_message(data).ok().map(|message| message.values)
    }

    /// Encode `values` on this advertisement's channel and publish them
    ///
    /// On error the current payload is left untouched.
    pub fn set_message(&self, values: &[Value]) -> Result<(), ProtocolError> {
        let encoded = encode_message(self.channel(), values)?;
        self.update_properties(|props| {
            props.manufacturer_data.insert(LEGO_CID, encoded);
        });
        Ok(())
    }

    /// Remove the carried message
    pub fn clear_message(&self) {
        self.update_properties(|props| {
            props.manufacturer_data.remove(&LEGO_CID);
        });
    }

    /// Called by the transport when it revokes this advertisement
    ///
    /// Runs the session bookkeeping first, then the user callback.
    pub fn release(&self) {
        debug!("Released advertisement: {}", self);

        let hook = self.inner.release_hook.lock().take();
        if let Some(hook) = hook {
            hook(&self.inner.path);
        }

        let on_release = self.inner.on_release.lock().clone();
        on_release(&self.inner.path);
    }

    pub(crate) fn set_release_hook(&self, hook: ReleaseHook) {
        *self.inner.release_hook.lock() = Some(hook);
    }

    pub(crate) fn clear_release_hook(&self) {
        self.inner.release_hook.lock().take();
    }

    /// Whether both handles refer to the same advertisement
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for BroadcastAdvertisement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastAdvertisement")
            .field("path", &self.inner.path)
            .field("properties", &*self.inner.properties.borrow())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for BroadcastAdvertisement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BroadcastAdvertisement(channel={}, data=", self.channel())?;
        match self.message() {
            Some(values) => write!(f, "{}", DisplayValues(&values))?,
            None => write!(f, "None")?,
        }
        match self.timeout() {
            Some(timeout) => write!(f, ", timeout={})", timeout),
            None => write!(f, ", timeout=0)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_path_format() {
        assert_eq!(
            BroadcastAdvertisement::new("pb_vhub", 0).path(),
            "/org/bluez/pb_vhub/advertisement000"
        );
        assert_eq!(
            BroadcastAdvertisement::new("pb_vhub", 42).path(),
            "/org/bluez/pb_vhub/advertisement042"
        );
        assert_eq!(
            BroadcastAdvertisement::new("hub", 255).path(),
            "/org/bluez/hub/advertisement255"
        );
    }

    #[test]
    fn test_message_roundtrip() {
        let adv = BroadcastAdvertisement::new("pb_vhub", 1);
        assert_eq!(adv.message(), None);

        adv.set_message(&[Value::Int(42), Value::Int(24)]).unwrap();
        assert_eq!(adv.message(), Some(vec![Value::Int(42), Value::Int(24)]));
        assert_eq!(
            adv.properties().manufacturer_data[&LEGO_CID],
            b"\x01\x61\x2a\x61\x18"
        );

        adv.clear_message();
        assert_eq!(adv.message(), None);
    }

    #[test]
    fn test_too_large_message_keeps_previous() {
        let adv = BroadcastAdvertisement::new("pb_vhub", 3);
        adv.set_message(&[Value::from("ok")]).unwrap();

        let err = adv
            .set_message(&[Value::Bytes(vec![0u8; 30])])
            .unwrap_err();
        assert!(matches!(err, ProtocolError::PayloadTooLarge { .. }));
        assert_eq!(adv.message(), Some(vec![Value::from("ok")]));
    }

    #[test]
    fn test_subscribers_see_updates() {
        let adv = BroadcastAdvertisement::new("pb_vhub", 2);
        let mut rx = adv.subscribe();
        assert!(!rx.has_changed().unwrap());

        adv.set_message(&[Value::Bool(true)]).unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(rx
            .borrow_and_update()
            .manufacturer_data
            .contains_key(&LEGO_CID));
    }

    #[test]
    fn test_release_runs_hook_then_callback() {
        let order = Arc::new(Mutex::new(Vec::new()));

        let adv = BroadcastAdvertisement::new("pb_vhub", 7).with_on_release({
            let order = order.clone();
            move |path: &str| order.lock().push(format!("user:{}", path))
        });
        adv.set_release_hook(Box::new({
            let order = order.clone();
            move |path: &str| order.lock().push(format!("hook:{}", path))
        }));

        adv.release();
        assert_eq!(
            *order.lock(),
            vec![
                "hook:/org/bluez/pb_vhub/advertisement007".to_string(),
                "user:/org/bluez/pb_vhub/advertisement007".to_string(),
            ]
        );

        // Hook is one-shot, user callback is not
        adv.release();
        assert_eq!(order.lock().len(), 3);
    }

    #[test]
    fn test_clones_share_state() {
        let calls = Arc::new(AtomicUsize::new(0));
        let adv = BroadcastAdvertisement::new("pb_vhub", 9);
        let clone = adv.clone();
        clone.set_on_release({
            let calls = calls.clone();
            move |_: &str| {
                calls.fetch_add(1, Ordering::SeqCst);
            }
        });

        adv.release();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(adv.ptr_eq(&clone));
        assert!(!adv.ptr_eq(&BroadcastAdvertisement::new("pb_vhub", 9)));
    }

    #[test]
    fn test_timeout_and_display() {
        let adv = BroadcastAdvertisement::new("pb_vhub", 1);
        adv.set_message(&[Value::Int(42), Value::from("hi")]).unwrap();
        adv.set_timeout(5);
        assert_eq!(adv.timeout(), Some(5));
        assert_eq!(
            adv.to_string(),
            "BroadcastAdvertisement(channel=1, data=(42, \"hi\"), timeout=5)"
        );

        adv.set_timeout(0);
        assert_eq!(adv.timeout(), None);
    }

    #[test]
    fn test_advertising_data_len() {
        let adv = BroadcastAdvertisement::new("pb_vhub", 1);
        assert_eq!(adv.properties().advertising_data_len(), 0);

        adv.set_message(&[Value::Int(5)]).unwrap();
        // len + 0xFF + CID (2) + channel, marker, header, payload
        assert_eq!(adv.properties().advertising_data_len(), 8);

        adv.update_properties(|props| props.local_name = Some("hub".into()));
        assert_eq!(adv.properties().advertising_data_len(), 13);
    }
}
