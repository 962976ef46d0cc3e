//! Policy-List Strategy
//!
//! Default-deny flag plus allow/deny identity lists. The deny path is
//! ordering-sensitive: the identity leaves the allow list before it
//! enters the deny list. Between the two steps the identity is in
//! neither list, which under default-deny still blocks; the inverse
//! order could leave it briefly in both, and which list the OS evaluates
//! first is not ours to assume.

use std::sync::Arc;

use super::backend::PolicyBackend;
use super::types::{StrategyKind, StrategyResult};
use crate::logic::identity::HardwareId;

pub struct PolicyListStrategy {
    backend: Arc<dyn PolicyBackend>,
}

impl PolicyListStrategy {
    pub fn new(backend: Arc<dyn PolicyBackend>) -> Self {
        Self { backend }
    }

    /// Move an identity to the allow list. Leaves the deny list first so
    /// the identity is never in both.
    pub fn allow(&self, hardware: &HardwareId) -> StrategyResult {
        let identity = hardware.canonical();

        if let Err(e) = self.backend.remove_from_deny_list(&identity) {
            return StrategyResult::failed(
                StrategyKind::PolicyList,
                format!("remove {} from deny list: {}", identity, e),
            );
        }
        match self.backend.add_to_allow_list(&identity) {
            Ok(()) => StrategyResult::ok(
                StrategyKind::PolicyList,
                format!("{} moved to allow list", identity),
            ),
            Err(e) => StrategyResult::failed(
                StrategyKind::PolicyList,
                format!("add {} to allow list: {}", identity, e),
            ),
        }
    }

    /// Move an identity to the deny list: remove from allow first, then
    /// add to deny.
    pub fn deny(&self, hardware: &HardwareId) -> StrategyResult {
        let identity = hardware.canonical();

        if let Err(e) = self.backend.remove_from_allow_list(&identity) {
            return StrategyResult::failed(
                StrategyKind::PolicyList,
                format!("remove {} from allow list: {}", identity, e),
            );
        }
        match self.backend.add_to_deny_list(&identity) {
            Ok(()) => StrategyResult::ok(
                StrategyKind::PolicyList,
                format!("{} moved to deny list", identity),
            ),
            Err(e) => StrategyResult::failed(
                StrategyKind::PolicyList,
                format!("add {} to deny list: {}", identity, e),
            ),
        }
    }

    /// Resolve an identity against the lists, most-specific variant
    /// first. Deny wins over allow; an identity in neither list falls to
    /// the default posture.
    pub fn is_blocked(&self, hardware: &HardwareId) -> bool {
        let deny = self.backend.deny_list().unwrap_or_default();
        let allow = self.backend.allow_list().unwrap_or_default();

        for variant in hardware.variants() {
            if deny.iter().any(|i| *i == variant) {
                return true;
            }
            if allow.iter().any(|i| *i == variant) {
                return false;
            }
        }
        // Neither list: default-deny posture blocks
        true
    }
}

// ============================================================================
// TESTS
// ============================================================================
