//! Per-channel cache of the most recent observation
//!
//! Entries expire lazily: a read older than the TTL behaves as absent.
//! Expired entries are dropped when the cache is full, before the oldest
//! live entry is evicted.

use std::collections::HashMap;
use std::time::Duration;

use pb_protocol::Value;
use tokio::time::Instant;

/// Default time a cached observation stays readable
pub const DEFAULT_MESSAGE_TTL: Duration = Duration::from_secs(60);

/// Number of distinct channels
pub const CHANNEL_COUNT: usize = 256;

/// Most recent message received on a channel
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedEntry {
    pub values: Vec<Value>,
    /// Signal strength in dBm
    pub rssi: i16,
    pub received_at: Instant,
}

/// TTL-bounded map from channel to [`ObservedEntry`]
#[derive(Debug, Clone)]
pub struct ObservationCache {
    ttl: Duration,
    capacity: usize,
    entries: HashMap<u8, ObservedEntry>,
}

impl ObservationCache {
    /// Create a cache holding at most `capacity` channels (clamped to 1..=256)
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = capacity.clamp(1, CHANNEL_COUNT);
        Self {
            ttl,
            capacity,
            entries: HashMap::with_capacity(capacity),
        }
    }

    /// Cache sized for a channel allow-list (all channels when empty)
    pub fn for_channels(channels: &[u8], ttl: Duration) -> Self {
        let capacity = if channels.is_empty() {
            CHANNEL_COUNT
        } else {
            channels.len()
        };
        Self::new(capacity, ttl)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Store `values` for `channel`, replacing any previous entry
    pub fn insert(&mut self, channel: u8, values: Vec<Value>, rssi: i16, now: Instant) {
        if !self.entries.contains_key(&channel) && self.entries.len() >= self.capacity {
            self.purge_expired(now);
            if self.entries.len() >= self.capacity {
                self.evict_oldest();
            }
        }

        self.entries.insert(
            channel,
            ObservedEntry {
                values,
                rssi,
                received_at: now,
            },
        );
    }

    /// Entry for `channel` if it has not expired at `now`
    pub fn get(&self, channel: u8, now: Instant) -> Option<&ObservedEntry> {
        self.entries
            .get(&channel)
            .filter(|entry| self.is_live(entry, now))
    }

    /// Drop all expired entries
    pub fn purge_expired(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.received_at) <= ttl);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_live(&self, entry: &ObservedEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.received_at) <= self.ttl
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.received_at)
            .map(|(channel, _)| *channel);
        if let Some(channel) = oldest {
            self.entries.remove(&channel);
        }
    }
}
