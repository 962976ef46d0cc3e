//! Enforcement Backends
//!
//! The narrow OS surface the enforcement layer consumes: policy storage
//! (default-deny flag plus the two identity lists) and per-instance
//! control. The core state machine is testable against the in-memory
//! implementations below, which never touch a real OS.

#![allow(dead_code)]

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::types::EnforcementError;

// ============================================================================
// TRAITS
// ============================================================================

/// Policy-storage surface: one default-deny flag and two identity lists.
pub trait PolicyBackend: Send + Sync {
    fn set_default_deny(&self, enabled: bool) -> Result<(), EnforcementError>;

    fn add_to_allow_list(&self, identity: &str) -> Result<(), EnforcementError>;
    fn remove_from_allow_list(&self, identity: &str) -> Result<(), EnforcementError>;
    fn allow_list(&self) -> Result<Vec<String>, EnforcementError>;

    fn add_to_deny_list(&self, identity: &str) -> Result<(), EnforcementError>;
    fn remove_from_deny_list(&self, identity: &str) -> Result<(), EnforcementError>;
    fn deny_list(&self) -> Result<Vec<String>, EnforcementError>;

    /// Ask the OS to re-evaluate present devices so a policy change takes
    /// effect within the session.
    fn request_reenumeration(&self) -> Result<(), EnforcementError>;

    /// Secondary re-enumeration mechanism, used once when the primary
    /// fails.
    fn request_reenumeration_fallback(&self) -> Result<(), EnforcementError>;
}

/// One present device instance as the OS reports it.
#[derive(Debug, Clone)]
pub struct InstanceInfo {
    pub pnp_id: String,
    pub description: String,
    pub disabled: bool,
}

/// Per-instance control surface. Requires elevated capability; `probe`
/// is consulted once at startup.
pub trait InstanceBackend: Send + Sync {
    /// Capability probe: can this process enumerate and toggle instances?
    fn probe(&self) -> bool;

    fn list_instances(&self) -> Result<Vec<InstanceInfo>, EnforcementError>;
    fn enable(&self, pnp_id: &str) -> Result<(), EnforcementError>;
    fn disable(&self, pnp_id: &str) -> Result<(), EnforcementError>;
    fn is_disabled(&self, pnp_id: &str) -> Result<bool, EnforcementError>;
}

// ============================================================================
// IN-MEMORY POLICY BACKEND
// ============================================================================

/// In-memory policy store. Used by tests and by non-Windows hosts, where
/// no real policy surface exists. Records the operation order so
/// ordering-sensitive behavior is checkable.
pub struct MemoryPolicyBackend {
    default_deny: AtomicBool,
    allow: RwLock<Vec<String>>,
    deny: RwLock<Vec<String>>,
    operations: RwLock<Vec<String>>,
    reenumerations: AtomicU64,
    fallback_reenumerations: AtomicU64,
    fail_reenumeration: AtomicBool,
}

impl MemoryPolicyBackend {
    pub fn new() -> Self {
        Self {
            default_deny: AtomicBool::new(false),
            allow: RwLock::new(Vec::new()),
            deny: RwLock::new(Vec::new()),
            operations: RwLock::new(Vec::new()),
            reenumerations: AtomicU64::new(0),
            fallback_reenumerations: AtomicU64::new(0),
            fail_reenumeration: AtomicBool::new(false),
        }
    }

    pub fn default_deny(&self) -> bool {
        self.default_deny.load(Ordering::Relaxed)
    }

    pub fn allow_list_snapshot(&self) -> Vec<String> {
        self.allow.read().clone()
    }

    pub fn deny_list_snapshot(&self) -> Vec<String> {
        self.deny.read().clone()
    }

    /// Ordered record of every mutating call, for ordering assertions.
    pub fn operations(&self) -> Vec<String> {
        self.operations.read().clone()
    }

    pub fn reenumeration_count(&self) -> u64 {
        self.reenumerations.load(Ordering::Relaxed)
    }

    pub fn fallback_reenumeration_count(&self) -> u64 {
        self.fallback_reenumerations.load(Ordering::Relaxed)
    }

    /// Make the primary re-enumeration mechanism fail.
    pub fn fail_reenumeration(&self, fail: bool) {
        self.fail_reenumeration.store(fail, Ordering::Relaxed);
    }

    fn record(&self, op: String) {
        self.operations.write().push(op);
    }
}

impl Default for MemoryPolicyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyBackend for MemoryPolicyBackend {
    fn set_default_deny(&self, enabled: bool) -> Result<(), EnforcementError> {
        self.default_deny.store(enabled, Ordering::Relaxed);
        self.record(format!("set_default_deny {}", enabled));
        Ok(())
    }

    fn add_to_allow_list(&self, identity: &str) -> Result<(), EnforcementError> {
        let mut allow = self.allow.write();
        if !allow.iter().any(|i| i == identity) {
            allow.push(identity.to_string());
        }
        self.record(format!("add_allow {}", identity));
        Ok(())
    }

    fn remove_from_allow_list(&self, identity: &str) -> Result<(), EnforcementError> {
        self.allow.write().retain(|i| i != identity);
        self.record(format!("remove_allow {}", identity));
        Ok(())
    }

    fn allow_list(&self) -> Result<Vec<String>, EnforcementError> {
        Ok(self.allow.read().clone())
    }

    fn add_to_deny_list(&self, identity: &str) -> Result<(), EnforcementError> {
        let mut deny = self.deny.write();
        if !deny.iter().any(|i| i == identity) {
            deny.push(identity.to_string());
        }
        self.record(format!("add_deny {}", identity));
        Ok(())
    }

    fn remove_from_deny_list(&self, identity: &str) -> Result<(), EnforcementError> {
        self.deny.write().retain(|i| i != identity);
        self.record(format!("remove_deny {}", identity));
        Ok(())
    }

    fn deny_list(&self) -> Result<Vec<String>, EnforcementError> {
        Ok(self.deny.read().clone())
    }

    fn request_reenumeration(&self) -> Result<(), EnforcementError> {
        if self.fail_reenumeration.load(Ordering::Relaxed) {
            return Err(EnforcementError("simulated re-enumeration failure".to_string()));
        }
        self.reenumerations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn request_reenumeration_fallback(&self) -> Result<(), EnforcementError> {
        self.fallback_reenumerations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// ============================================================================
// IN-MEMORY INSTANCE BACKEND
// ============================================================================

/// In-memory instance store for tests and capability-less hosts.
pub struct MemoryInstanceBackend {
    capable: bool,
    instances: RwLock<Vec<InstanceInfo>>,
    fail_all: AtomicBool,
}

impl MemoryInstanceBackend {
    pub fn new(capable: bool) -> Self {
        Self {
            capable,
            instances: RwLock::new(Vec::new()),
            fail_all: AtomicBool::new(false),
        }
    }

    /// Register a present instance.
    pub fn register(&self, pnp_id: &str, description: &str) {
        self.instances.write().push(InstanceInfo {
            pnp_id: pnp_id.to_uppercase(),
            description: description.to_string(),
            disabled: false,
        });
    }

    /// Make every control call fail (transient OS failure simulation).
    pub fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::Relaxed);
    }

    fn check_failure(&self) -> Result<(), EnforcementError> {
        if self.fail_all.load(Ordering::Relaxed) {
            Err(EnforcementError("simulated instance failure".to_string()))
        } else {
            Ok(())
        }
    }

    fn set_disabled(&self, pnp_id: &str, disabled: bool) -> Result<(), EnforcementError> {
        self.check_failure()?;
        let mut instances = self.instances.write();
        match instances.iter_mut().find(|i| i.pnp_id == pnp_id.to_uppercase()) {
            Some(info) => {
                info.disabled = disabled;
                Ok(())
            }
            None => Err(EnforcementError(format!("no such instance: {}", pnp_id))),
        }
    }
}

impl InstanceBackend for MemoryInstanceBackend {
    fn probe(&self) -> bool {
        self.capable
    }

    fn list_instances(&self) -> Result<Vec<InstanceInfo>, EnforcementError> {
        self.check_failure()?;
        Ok(self.instances.read().clone())
    }

    fn enable(&self, pnp_id: &str) -> Result<(), EnforcementError> {
        self.set_disabled(pnp_id, false)
    }

    fn disable(&self, pnp_id: &str) -> Result<(), EnforcementError> {
        self.set_disabled(pnp_id, true)
    }

    fn is_disabled(&self, pnp_id: &str) -> Result<bool, EnforcementError> {
        self.check_failure()?;
        Ok(self
            .instances
            .read()
            .iter()
            .any(|i| i.pnp_id == pnp_id.to_uppercase() && i.disabled))
    }
}

// ============================================================================
// TESTS
// ============================================================================
