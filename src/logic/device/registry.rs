//! Live Device Registry
//!
//! Concurrent map of currently attached devices, keyed by raw PnP id.
//! Insertion/removal handlers mutate it, status queries read it; updates
//! are atomic per key with no global lock.

#![allow(dead_code)]

use dashmap::DashMap;
use std::collections::HashMap;

use super::types::{Device, DeviceStatus};
use crate::logic::identity::ParsedDeviceId;

/// Live set of attached devices.
///
/// No entity outlives the physical device's presence: `remove` is called
/// from the OS removal handler and drops the record entirely.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: DashMap<String, Device>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            devices: DashMap::new(),
        }
    }

    /// Insert or replace the record for a raw id. Returns the previous
    /// record if the id was already present (re-enumeration of a device
    /// we are still tracking).
    pub fn insert(&self, device: Device) -> Option<Device> {
        self.devices.insert(device.raw_id.clone(), device)
    }

    /// Drop the record on OS removal. Returns the removed record.
    pub fn remove(&self, raw_id: &str) -> Option<Device> {
        self.devices.remove(raw_id).map(|(_, d)| d)
    }

    pub fn get(&self, raw_id: &str) -> Option<Device> {
        self.devices.get(raw_id).map(|r| r.clone())
    }

    pub fn contains(&self, raw_id: &str) -> bool {
        self.devices.contains_key(raw_id)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Atomically update one device's record through `f`. No-op if the
    /// device has already been removed.
    pub fn update<F>(&self, raw_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Device),
    {
        match self.devices.get_mut(raw_id) {
            Some(mut entry) => {
                f(entry.value_mut());
                true
            }
            None => false,
        }
    }

    /// Snapshot of all live devices.
    pub fn snapshot(&self) -> Vec<Device> {
        self.devices.iter().map(|r| r.value().clone()).collect()
    }

    /// Live sibling interfaces of a composite unit: devices whose parsed
    /// id shares the parent identity and serial but carries a different
    /// interface number.
    pub fn siblings_of(&self, parsed: &ParsedDeviceId) -> Vec<Device> {
        if !parsed.is_composite_interface() {
            return Vec::new();
        }
        self.devices
            .iter()
            .filter(|r| {
                r.value()
                    .parsed_id()
                    .map(|p| parsed.is_sibling_of(&p))
                    .unwrap_or(false)
            })
            .map(|r| r.value().clone())
            .collect()
    }

    /// Count of devices per status, for the status snapshot.
    pub fn status_counts(&self) -> HashMap<DeviceStatus, usize> {
        let mut counts = HashMap::new();
        for r in self.devices.iter() {
            *counts.entry(r.value().status).or_insert(0) += 1;
        }
        counts
    }
}

// ============================================================================
// TESTS
// ============================================================================
