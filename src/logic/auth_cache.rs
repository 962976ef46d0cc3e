//! Authentication Result Cache
//!
//! Time-boxed memoization of "this hardware identity passed interactive
//! authentication", with an independently configured TTL per device class.
//! Two instances exist in the engine: the authentication cache proper
//! (Keyboard/Mouse, 5 minutes) and a separate short-TTL instance that only
//! backs the storage scanned-clean grace window - the grace instance is
//! never consulted as a skip-authentication signal.
//!
//! Reads lazily evict expired entries, so correctness never depends on the
//! periodic sweep having run. Thread-safe for concurrent device-event
//! handlers; entries are per-key atomic with no global lock.

#![allow(dead_code)]

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::device::DeviceClass;

// ============================================================================
// CACHE
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    expires_at: Instant,
    class: DeviceClass,
}

/// Concurrent TTL cache keyed by identity string.
pub struct AuthCache {
    entries: DashMap<String, CacheEntry>,
    /// TTL per class; a class without a TTL is not cacheable in this
    /// instance and `put` refuses it.
    ttls: Vec<(DeviceClass, Duration)>,
}

impl AuthCache {
    pub fn new(ttls: Vec<(DeviceClass, Duration)>) -> Self {
        Self {
            entries: DashMap::new(),
            ttls,
        }
    }

    /// The engine's authentication cache: Keyboard and Mouse only.
    pub fn for_authentication(ttl: Duration) -> Self {
        Self::new(vec![
            (DeviceClass::Keyboard, ttl),
            (DeviceClass::Mouse, ttl),
        ])
    }

    /// The storage scanned-clean grace instance.
    pub fn for_storage_grace(ttl: Duration) -> Self {
        Self::new(vec![(DeviceClass::Storage, ttl)])
    }

    fn ttl_for(&self, class: DeviceClass) -> Option<Duration> {
        self.ttls
            .iter()
            .find(|(c, _)| *c == class)
            .map(|(_, ttl)| *ttl)
    }

    /// Record a passed authentication. Returns false (and stores nothing)
    /// for classes this instance has no TTL for.
    pub fn put(&self, key: &str, class: DeviceClass) -> bool {
        let Some(ttl) = self.ttl_for(class) else {
            log::debug!("Cache refuses class {} for key {}", class, key);
            return false;
        };
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                expires_at: Instant::now() + ttl,
                class,
            },
        );
        true
    }

    /// True if a non-expired entry exists. Expired entries found on the
    /// read path are evicted here.
    pub fn is_valid(&self, key: &str) -> bool {
        let now = Instant::now();
        // The read guard must drop before the eviction below takes a
        // write lock on the same shard.
        let valid = match self.entries.get(key) {
            Some(entry) => entry.expires_at > now,
            None => return false,
        };
        if !valid {
            self.entries.remove_if(key, |_, e| e.expires_at <= now);
        }
        valid
    }

    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Time until the entry expires, None if absent or already expired.
    pub fn time_remaining(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries.get(key).and_then(|entry| {
            if entry.expires_at > now {
                Some(entry.expires_at - now)
            } else {
                None
            }
        })
    }

    /// Evict all expired entries. Returns how many were removed. The
    /// periodic sweep calls this; reads do not need it for correctness.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        before - self.entries.len()
    }

    /// Class recorded for a live entry (test and status introspection).
    pub fn class_of(&self, key: &str) -> Option<DeviceClass> {
        self.entries.get(key).map(|e| e.class)
    }
}

/// Spawn the periodic sweep for a cache instance.
pub fn spawn_sweeper(cache: Arc<AuthCache>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            let evicted = cache.sweep();
            if evicted > 0 {
                log::debug!("Auth cache sweep evicted {} entries", evicted);
            }
        }
    })
}

// ============================================================================
// TESTS
// ============================================================================
