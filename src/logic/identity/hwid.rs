//! Hardware Identity Parsing
//!
//! Normalizes a raw plug-and-play device identifier into a stable hardware
//! identity and generates the ordered identity variants a policy match must
//! try. The raw id format is bus-assigned:
//!
//! `USB\VID_xxxx&PID_yyyy[&REV_zzzz][&MI_nn]\<instance-serial>`
//!
//! `MI_nn` marks one interface of a composite device; the parent composite
//! identity is the same id with the `MI_` segment removed.

#![allow(dead_code)]

use serde::{Deserialize, Serialize};

use crate::constants::USB_BUS_PREFIX;

// ============================================================================
// HARDWARE IDENTITY
// ============================================================================

/// Stable vendor/product/revision identity, shared by all units of a model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HardwareId {
    /// 4-digit hex vendor id, uppercased
    pub vendor_id: String,
    /// 4-digit hex product id, uppercased
    pub product_id: String,
    /// Optional revision, uppercased
    pub revision: Option<String>,
}

impl HardwareId {
    pub fn new(vendor_id: &str, product_id: &str) -> Self {
        Self {
            vendor_id: vendor_id.to_uppercase(),
            product_id: product_id.to_uppercase(),
            revision: None,
        }
    }

    pub fn with_revision(mut self, revision: &str) -> Self {
        self.revision = Some(revision.to_uppercase());
        self
    }

    /// Canonical identity string without revision: `USB\VID_xxxx&PID_yyyy`
    pub fn canonical(&self) -> String {
        format!("USB\\VID_{}&PID_{}", self.vendor_id, self.product_id)
    }

    /// Ordered identity variants, most-specific to least-specific.
    ///
    /// A policy match tries these in order; the first list hit wins. The
    /// vendor-only variant allows vendor-wide rules.
    pub fn variants(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(3);
        if let Some(rev) = &self.revision {
            out.push(format!(
                "USB\\VID_{}&PID_{}&REV_{}",
                self.vendor_id, self.product_id, rev
            ));
        }
        out.push(self.canonical());
        out.push(format!("USB\\VID_{}", self.vendor_id));
        out
    }
}

impl std::fmt::Display for HardwareId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

// ============================================================================
// PARSED DEVICE ID
// ============================================================================

/// One raw PnP id, decomposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedDeviceId {
    /// The raw id as observed, uppercased
    pub raw: String,
    /// Stable hardware identity
    pub hardware: HardwareId,
    /// Bus-assigned instance serial (the segment after the last `\`)
    pub serial: Option<String>,
    /// Composite interface number (`MI_nn`), if this id is one interface
    /// of a composite device
    pub interface: Option<u8>,
}

impl ParsedDeviceId {
    /// True if this id is one interface of a composite device.
    pub fn is_composite_interface(&self) -> bool {
        self.interface.is_some()
    }

    /// Identity of the parent composite unit (the id minus the `MI_`
    /// segment). Same as `hardware` for non-composite devices.
    pub fn parent_identity(&self) -> HardwareId {
        self.hardware.clone()
    }

    /// True if `other` is a sibling interface of the same physical
    /// composite unit: same hardware identity, same serial, both carry an
    /// interface number, and the numbers differ.
    pub fn is_sibling_of(&self, other: &ParsedDeviceId) -> bool {
        self.interface.is_some()
            && other.interface.is_some()
            && self.interface != other.interface
            && self.hardware == other.hardware
            && self.serial == other.serial
    }
}

// ============================================================================
// PARSING
// ============================================================================

/// Parse a raw PnP id into its parts.
///
/// Returns `None` for ids that do not carry the removable-bus prefix or do
/// not contain a vendor/product pair; the caller treats those as
/// not-applicable and ignores them.
pub fn parse_raw_id(raw: &str) -> Option<ParsedDeviceId> {
    let raw = raw.trim().to_uppercase();

    if !raw.starts_with(USB_BUS_PREFIX) {
        return None;
    }

    let rest = &raw[USB_BUS_PREFIX.len()..];
    let (hardware_part, serial_part) = match rest.find('\\') {
        Some(idx) => (&rest[..idx], Some(&rest[idx + 1..])),
        None => (rest, None),
    };

    let mut vendor_id = None;
    let mut product_id = None;
    let mut revision = None;
    let mut interface = None;

    for segment in hardware_part.split('&') {
        if let Some(v) = segment.strip_prefix("VID_") {
            vendor_id = Some(v.to_string());
        } else if let Some(p) = segment.strip_prefix("PID_") {
            product_id = Some(p.to_string());
        } else if let Some(r) = segment.strip_prefix("REV_") {
            revision = Some(r.to_string());
        } else if let Some(m) = segment.strip_prefix("MI_") {
            interface = m.parse::<u8>().ok();
        }
    }

    let vendor_id = vendor_id.filter(|v| !v.is_empty())?;
    let product_id = product_id.filter(|p| !p.is_empty())?;

    let hardware = HardwareId {
        vendor_id,
        product_id,
        revision,
    };

    Some(ParsedDeviceId {
        raw: raw.clone(),
        hardware,
        serial: serial_part
            .map(|s| s.to_string())
            .filter(|s| !s.is_empty()),
        interface,
    })
}

// ============================================================================
// TESTS
// ============================================================================
