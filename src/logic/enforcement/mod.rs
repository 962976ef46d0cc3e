//! Enforcement Abstraction Module
//!
//! Lớp chặn thiết bị ở mức hệ điều hành, hai chiến lược ghép lại:
//! policy-list (default-deny + allow/deny identity lists) và instance
//! (enable/disable đúng một physical instance).
//!
//! ## Structure
//! - `types`: EnforcementAction, per-strategy outcomes, error
//! - `backend`: consumed OS traits + in-memory implementations
//! - `policy_list`: policy-list strategy (ordering-sensitive deny)
//! - `instance`: instance strategy (probed once, may be unavailable)
//! - `host`: OS-backed backends (shell-outs, degraded elsewhere)
//!
//! Failure of one strategy never aborts the call: both are attempted and
//! the call succeeds if either succeeds, logged per strategy.

#![allow(dead_code)]

pub mod backend;
pub mod host;
pub mod instance;
pub mod policy_list;
pub mod types;

pub use self::backend::{
    InstanceBackend, InstanceInfo, MemoryInstanceBackend, MemoryPolicyBackend, PolicyBackend,
};
pub use self::host::{HostInstanceBackend, HostPolicyBackend};
pub use self::types::{EnforcementError, EnforcementOutcome, StrategyKind, StrategyResult};

use std::sync::Arc;
use std::time::Duration;

use crate::logic::identity::HardwareId;
use crate::logic::retry::BoundedRetry;
use self::instance::InstanceStrategy;
use self::policy_list::PolicyListStrategy;

// ============================================================================
// ENFORCEMENT
// ============================================================================

/// The dual-strategy system-level blocking layer.
pub struct Enforcement {
    policy: PolicyListStrategy,
    instance: InstanceStrategy,
    policy_backend: Arc<dyn PolicyBackend>,
}

impl Enforcement {
    /// Compose the two strategies. The instance strategy's availability
    /// is probed exactly once, here; if it is unavailable the layer runs
    /// policy-list-only for the life of the process.
    pub fn new(
        policy_backend: Arc<dyn PolicyBackend>,
        instance_backend: Arc<dyn InstanceBackend>,
    ) -> Self {
        let policy = PolicyListStrategy::new(policy_backend.clone());
        let instance = InstanceStrategy::probe(instance_backend);

        if let Err(e) = policy_backend.set_default_deny(true) {
            log::error!("Failed to set default-deny posture: {}", e);
        }

        Self {
            policy,
            instance,
            policy_backend,
        }
    }

    /// True when the instance strategy is unavailable and only the
    /// policy-list strategy is enforcing.
    pub fn degraded(&self) -> bool {
        !self.instance.available()
    }

    /// Allow an identity through both strategies.
    pub fn allow(&self, hardware: &HardwareId) -> EnforcementOutcome {
        let mut outcome = EnforcementOutcome::new(format!("allow {}", hardware));
        outcome.push(self.policy.allow(hardware));
        if let Some(result) = self.instance.enable_matching(hardware) {
            outcome.push(result);
        }
        outcome.log();
        outcome
    }

    /// Deny an identity through both strategies, then request
    /// re-enumeration so the policy takes effect without a replug.
    pub fn deny(&self, hardware: &HardwareId) -> EnforcementOutcome {
        let mut outcome = EnforcementOutcome::new(format!("deny {}", hardware));
        outcome.push(self.policy.deny(hardware));
        if let Some(result) = self.instance.disable_matching(hardware) {
            outcome.push(result);
        }
        outcome.log();

        self.reenumerate();
        outcome
    }

    /// Enable one physical instance.
    pub fn enable_instance(&self, pnp_id: &str) -> EnforcementOutcome {
        let mut outcome = EnforcementOutcome::new(format!("enable instance {}", pnp_id));
        match self.instance.enable(pnp_id) {
            Some(result) => outcome.push(result),
            None => outcome.push(StrategyResult::skipped(
                StrategyKind::Instance,
                "instance strategy unavailable",
            )),
        }
        outcome.log();
        outcome
    }

    /// Disable one physical instance.
    pub fn disable_instance(&self, pnp_id: &str) -> EnforcementOutcome {
        let mut outcome = EnforcementOutcome::new(format!("disable instance {}", pnp_id));
        match self.instance.disable(pnp_id) {
            Some(result) => outcome.push(result),
            None => outcome.push(StrategyResult::skipped(
                StrategyKind::Instance,
                "instance strategy unavailable",
            )),
        }
        outcome.log();
        outcome
    }

    /// True if either strategy currently blocks this instance.
    pub fn is_blocked(&self, pnp_id: &str) -> bool {
        if self.instance.is_disabled(pnp_id).unwrap_or(false) {
            return true;
        }
        match crate::logic::identity::parse_raw_id(pnp_id) {
            Some(parsed) => self.policy.is_blocked(&parsed.hardware),
            None => false,
        }
    }

    /// Best-effort re-enumeration: primary mechanism, then one retry via
    /// the secondary. Failure never reverts an already-applied deny.
    fn reenumerate(&self) {
        let primary = self.policy_backend.request_reenumeration();
        if primary.is_ok() {
            return;
        }
        log::warn!(
            "Primary re-enumeration failed ({}), trying secondary",
            primary.err().map(|e| e.to_string()).unwrap_or_default()
        );
        let retry = BoundedRetry::new(1, Duration::from_millis(0));
        if retry
            .run("re-enumeration (secondary)", || {
                self.policy_backend.request_reenumeration_fallback()
            })
            .is_none()
        {
            log::error!("Re-enumeration failed on both mechanisms; policy applies at next replug");
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Enforcement, Arc<MemoryPolicyBackend>, Arc<MemoryInstanceBackend>) {
        let policy = Arc::new(MemoryPolicyBackend::new());
        let instance = Arc::new(MemoryInstanceBackend::new(true));
        let enforcement = Enforcement::new(policy.clone(), instance.clone());
        (enforcement, policy, instance)
    }

    fn logitech() -> HardwareId {
        HardwareId::new("046D", "C52B")
    }

    #[test]
    fn test_new_sets_default_deny() {
        let (_enforcement, policy, _) = setup();
        assert!(policy.default_deny());
    }

    #[test]
    fn test_deny_removes_from_allow_before_adding_to_deny() {
        let (enforcement, policy, _) = setup();
        let hw = logitech();

        enforcement.allow(&hw);
        assert!(policy.allow_list_snapshot().contains(&hw.canonical()));

        let outcome = enforcement.deny(&hw);
        assert!(outcome.succeeded());
        assert!(!policy.allow_list_snapshot().contains(&hw.canonical()));
        assert!(policy.deny_list_snapshot().contains(&hw.canonical()));

        let ops = policy.operations();
        let remove_idx = ops
            .iter()
            .position(|op| op == "remove_allow USB\\VID_046D&PID_C52B")
            .unwrap();
        let add_idx = ops
            .iter()
            .position(|op| op == "add_deny USB\\VID_046D&PID_C52B")
            .unwrap();
        assert!(remove_idx < add_idx, "allow removal must precede deny add");
    }

    #[test]
    fn test_deny_is_idempotent() {
        let (enforcement, policy, _) = setup();
        let hw = logitech();

        enforcement.deny(&hw);
        enforcement.deny(&hw);

        let deny = policy.deny_list_snapshot();
        assert_eq!(
            deny.iter().filter(|i| **i == hw.canonical()).count(),
            1,
            "identity must appear in the deny list exactly once"
        );
        assert!(!policy.allow_list_snapshot().contains(&hw.canonical()));
    }

    #[test]
    fn test_deny_triggers_reenumeration() {
        let (enforcement, policy, _) = setup();
        enforcement.deny(&logitech());
        assert_eq!(policy.reenumeration_count(), 1);
    }

    #[test]
    fn test_reenumeration_failure_does_not_revert_deny() {
        let (enforcement, policy, _) = setup();
        policy.fail_reenumeration(true);

        let outcome = enforcement.deny(&logitech());
        assert!(outcome.succeeded());
        assert!(policy.deny_list_snapshot().contains(&logitech().canonical()));
        // Secondary mechanism was attempted
        assert_eq!(policy.fallback_reenumeration_count(), 1);
    }

    #[test]
    fn test_instance_failure_does_not_abort_call() {
        let policy = Arc::new(MemoryPolicyBackend::new());
        let instance = Arc::new(MemoryInstanceBackend::new(true));
        instance.fail_all(true);
        let enforcement = Enforcement::new(policy.clone(), instance);

        let outcome = enforcement.deny(&logitech());
        // Policy strategy still succeeded
        assert!(outcome.succeeded());
        assert!(policy.deny_list_snapshot().contains(&logitech().canonical()));
    }

    #[test]
    fn test_degraded_mode_without_instance_strategy() {
        let policy = Arc::new(MemoryPolicyBackend::new());
        let instance = Arc::new(MemoryInstanceBackend::new(false));
        let enforcement = Enforcement::new(policy, instance);

        assert!(enforcement.degraded());
        // Policy-list strategy still enforces
        let outcome = enforcement.deny(&logitech());
        assert!(outcome.succeeded());
    }

    #[test]
    fn test_is_blocked_by_policy_list() {
        let (enforcement, _, _) = setup();
        let raw = "USB\\VID_046D&PID_C52B\\SER1";

        enforcement.deny(&logitech());
        assert!(enforcement.is_blocked(raw));

        enforcement.allow(&logitech());
        assert!(!enforcement.is_blocked(raw));
    }

    #[test]
    fn test_is_blocked_by_disabled_instance() {
        let (enforcement, _, instance) = setup();
        let raw = "USB\\VID_0781&PID_5567\\SER9";
        instance.register(raw, "Flash Drive");

        // Allow-listed identity, so only the instance state decides
        enforcement.allow(&HardwareId::new("0781", "5567"));
        assert!(!enforcement.is_blocked(raw));

        enforcement.disable_instance(raw);
        assert!(enforcement.is_blocked(raw));

        enforcement.enable_instance(raw);
        assert!(!enforcement.is_blocked(raw));
    }

    #[test]
    fn test_unlisted_identity_blocked_by_default_posture() {
        let (enforcement, _, _) = setup();
        assert!(enforcement.is_blocked("USB\\VID_FFFF&PID_0001\\X"));
    }
}
