//! Device Types
//!
//! KHÔNG chứa logic - chỉ data structures.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::logic::identity::{HardwareId, ParsedDeviceId};

// ============================================================================
// DEVICE CLASS
// ============================================================================

/// Functional class of a device, derived from the OS setup class GUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceClass {
    Keyboard,
    Mouse,
    Storage,
    Hid,
    Other,
}

/// Setup class GUIDs as the OS reports them (uppercase, braced).
const GUID_KEYBOARD: &str = "{4D36E96B-E325-11CE-BFC1-08002BE10318}";
const GUID_MOUSE: &str = "{4D36E96F-E325-11CE-BFC1-08002BE10318}";
const GUID_HID: &str = "{745A17A0-74D3-11D0-B6FE-00A0C90F57DA}";
const GUID_DISK: &str = "{4D36E967-E325-11CE-BFC1-08002BE10318}";
const GUID_VOLUME: &str = "{71A27CDD-812A-11D0-BEC7-08002BE2092F}";

impl DeviceClass {
    /// Map an OS setup class GUID to a device class. Unknown GUIDs fall
    /// into `Other`, which is denied by default policy.
    pub fn from_class_guid(guid: &str) -> Self {
        match guid.trim().to_uppercase().as_str() {
            GUID_KEYBOARD => DeviceClass::Keyboard,
            GUID_MOUSE => DeviceClass::Mouse,
            GUID_HID => DeviceClass::Hid,
            GUID_DISK | GUID_VOLUME => DeviceClass::Storage,
            _ => DeviceClass::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Keyboard => "keyboard",
            DeviceClass::Mouse => "mouse",
            DeviceClass::Storage => "storage",
            DeviceClass::Hid => "hid",
            DeviceClass::Other => "other",
        }
    }

    /// Parse the rule-file spelling of a class. `*` and empty are the
    /// wildcard (None).
    pub fn from_rule_field(field: &str) -> Option<Self> {
        match field.trim().to_lowercase().as_str() {
            "keyboard" => Some(DeviceClass::Keyboard),
            "mouse" => Some(DeviceClass::Mouse),
            "storage" => Some(DeviceClass::Storage),
            "hid" => Some(DeviceClass::Hid),
            "other" => Some(DeviceClass::Other),
            _ => None,
        }
    }

    /// Classes authenticated through the interactive challenge.
    pub fn uses_challenge(&self) -> bool {
        !matches!(self, DeviceClass::Storage)
    }

    /// Classes whose successful authentication may be cached. Storage is
    /// excluded: it must never skip a fresh scan.
    pub fn cacheable(&self) -> bool {
        matches!(self, DeviceClass::Keyboard | DeviceClass::Mouse)
    }

    /// Classes left functional during authentication so the user can
    /// answer the challenge. Everything else is denied up front.
    pub fn functional_while_authenticating(&self) -> bool {
        matches!(self, DeviceClass::Keyboard | DeviceClass::Mouse)
    }
}

impl std::fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// DEVICE STATUS
// ============================================================================

/// Lifecycle state of one attached device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceStatus {
    Discovered,
    PendingEnforcement,
    Authenticating,
    Trusted,
    Blocked,
    Quarantined,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Discovered => "discovered",
            DeviceStatus::PendingEnforcement => "pending_enforcement",
            DeviceStatus::Authenticating => "authenticating",
            DeviceStatus::Trusted => "trusted",
            DeviceStatus::Blocked => "blocked",
            DeviceStatus::Quarantined => "quarantined",
        }
    }

    /// Terminal for this connection: no further transitions until the
    /// device is removed and re-inserted.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeviceStatus::Trusted | DeviceStatus::Blocked | DeviceStatus::Quarantined
        )
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// DEVICE
// ============================================================================

/// One physically attached unit.
///
/// The two blocked flags are independent: during transition windows a
/// device can be blocked at the OS level and not yet at the application
/// level, or the reverse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Raw PnP id, globally unique per physical instance
    pub raw_id: String,
    /// Human-readable name as reported by the OS
    pub display_name: String,
    /// Stable hardware identity
    pub hardware: HardwareId,
    /// Instance serial, when the bus reports one
    pub serial: Option<String>,
    /// Functional class
    pub class: DeviceClass,
    /// True if this is one interface of a composite unit
    pub composite: bool,
    /// Interface number within the composite unit
    pub interface: Option<u8>,
    pub status: DeviceStatus,
    pub connected_at: DateTime<Utc>,
    pub authenticated_at: Option<DateTime<Utc>>,
    pub quarantined_at: Option<DateTime<Utc>>,
    pub system_level_blocked: bool,
    pub application_level_blocked: bool,
}

impl Device {
    pub fn new(parsed: &ParsedDeviceId, display_name: &str, class: DeviceClass) -> Self {
        Self {
            raw_id: parsed.raw.clone(),
            display_name: display_name.to_string(),
            hardware: parsed.hardware.clone(),
            serial: parsed.serial.clone(),
            class,
            composite: parsed.is_composite_interface(),
            interface: parsed.interface,
            status: DeviceStatus::Discovered,
            connected_at: Utc::now(),
            authenticated_at: None,
            quarantined_at: None,
            system_level_blocked: false,
            application_level_blocked: false,
        }
    }

    /// Re-parse this device's raw id. The id was validated at insertion,
    /// so this always succeeds for registry-held devices.
    pub fn parsed_id(&self) -> Option<ParsedDeviceId> {
        crate::logic::identity::parse_raw_id(&self.raw_id)
    }

    /// Transition to `Trusted`. Clears the application-level block first:
    /// a device is never `Trusted` while `application_level_blocked`.
    pub fn mark_trusted(&mut self) {
        self.application_level_blocked = false;
        self.system_level_blocked = false;
        self.authenticated_at = Some(Utc::now());
        self.status = DeviceStatus::Trusted;
    }

    pub fn mark_blocked(&mut self) {
        self.application_level_blocked = true;
        self.status = DeviceStatus::Blocked;
    }

    pub fn mark_quarantined(&mut self) {
        self.application_level_blocked = true;
        self.quarantined_at = Some(Utc::now());
        self.status = DeviceStatus::Quarantined;
    }
}

// ============================================================================
// TESTS
// ============================================================================
