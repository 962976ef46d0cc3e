//! Rule Types
//!
//! One allow or deny record and the pipe-delimited line format it
//! persists as:
//!
//! `id|name|vendorId|productId|deviceClass|reason|enabled|createdBy|createdDate`
//!
//! `#`-prefixed lines are comments. Empty vendor/product/class fields are
//! wildcards, which is what makes vendor-wide rules possible.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::logic::device::DeviceClass;
use crate::logic::identity::HardwareId;

// ============================================================================
// RULE
// ============================================================================

/// Which list a rule belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleList {
    Allow,
    Deny,
}

impl RuleList {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleList::Allow => "allow",
            RuleList::Deny => "deny",
        }
    }
}

/// An allow or deny record. Appended, never mutated in place; disabling
/// is done via the `enabled` flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    /// Empty = wildcard (matches any vendor)
    pub vendor_id: String,
    /// Empty = wildcard
    pub product_id: String,
    /// In-memory narrowing only; the compatibility line format has no
    /// serial column, so persisted rules always carry the wildcard here.
    pub serial: String,
    /// None = wildcard
    pub device_class: Option<DeviceClass>,
    pub reason: String,
    pub enabled: bool,
    pub created_by: String,
    pub created_date: DateTime<Utc>,
}

impl Rule {
    /// Rule matching one hardware identity (vendor + product), any serial,
    /// any class.
    pub fn for_identity(hardware: &HardwareId, name: &str, reason: &str, created_by: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            vendor_id: hardware.vendor_id.clone(),
            product_id: hardware.product_id.clone(),
            serial: String::new(),
            device_class: None,
            reason: reason.to_string(),
            enabled: true,
            created_by: created_by.to_string(),
            created_date: Utc::now(),
        }
    }

    pub fn with_class(mut self, class: DeviceClass) -> Self {
        self.device_class = Some(class);
        self
    }

    pub fn with_serial(mut self, serial: &str) -> Self {
        self.serial = serial.to_uppercase();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// A rule matches a device iff every narrowing field is empty-or-equal
    /// and the rule is enabled.
    pub fn matches(&self, hardware: &HardwareId, serial: Option<&str>, class: DeviceClass) -> bool {
        if !self.enabled {
            return false;
        }
        if !self.vendor_id.is_empty() && self.vendor_id != hardware.vendor_id {
            return false;
        }
        if !self.product_id.is_empty() && self.product_id != hardware.product_id {
            return false;
        }
        if !self.serial.is_empty() && Some(self.serial.as_str()) != serial {
            return false;
        }
        if let Some(rule_class) = self.device_class {
            if rule_class != class {
                return false;
            }
        }
        true
    }

    // ------------------------------------------------------------------
    // Line format
    // ------------------------------------------------------------------

    /// Serialize to one pipe-delimited line (no trailing newline).
    pub fn to_line(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.id,
            self.name,
            self.vendor_id,
            self.product_id,
            self.device_class.map(|c| c.as_str()).unwrap_or(""),
            self.reason,
            self.enabled,
            self.created_by,
            self.created_date.to_rfc3339(),
        )
    }

    /// Parse one line. Comment and blank lines are the caller's concern;
    /// this returns an error for anything that is not a well-formed rule.
    pub fn parse_line(line: &str) -> Result<Self, String> {
        let fields: Vec<&str> = line.split('|').collect();
        if fields.len() != 9 {
            return Err(format!("expected 9 fields, got {}", fields.len()));
        }

        let id = fields[0].trim();
        if id.is_empty() {
            return Err("empty rule id".to_string());
        }

        let enabled = match fields[6].trim().to_lowercase().as_str() {
            "true" | "1" => true,
            "false" | "0" => false,
            other => return Err(format!("bad enabled flag: {}", other)),
        };

        let created_date = DateTime::parse_from_rfc3339(fields[8].trim())
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| format!("bad created date: {}", e))?;

        let class_field = fields[4].trim();
        let device_class = if class_field.is_empty() || class_field == "*" {
            None
        } else {
            Some(
                DeviceClass::from_rule_field(class_field)
                    .ok_or_else(|| format!("unknown device class: {}", class_field))?,
            )
        };

        Ok(Self {
            id: id.to_string(),
            name: fields[1].trim().to_string(),
            vendor_id: fields[2].trim().to_uppercase(),
            product_id: fields[3].trim().to_uppercase(),
            serial: String::new(),
            device_class,
            reason: fields[5].trim().to_string(),
            enabled,
            created_by: fields[7].trim().to_string(),
            created_date,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
