//! Instance Strategy
//!
//! Targets one physical device instance instead of a vendor/product
//! class. More accurate than the policy-list strategy but requires
//! elevated capability, so availability is probed exactly once at
//! startup; when unavailable every call reports itself skipped and the
//! enforcement layer runs policy-list-only.

use std::sync::Arc;

use super::backend::InstanceBackend;
use super::types::{StrategyKind, StrategyResult};
use crate::logic::identity::{parse_raw_id, HardwareId};

pub struct InstanceStrategy {
    backend: Arc<dyn InstanceBackend>,
    available: bool,
}

impl InstanceStrategy {
    /// Probe capability once and remember the answer.
    pub fn probe(backend: Arc<dyn InstanceBackend>) -> Self {
        let available = backend.probe();
        if available {
            log::info!("Instance enforcement strategy available");
        } else {
            log::warn!("Instance enforcement strategy unavailable, policy-list only");
        }
        Self { backend, available }
    }

    pub fn available(&self) -> bool {
        self.available
    }

    /// Enable one instance. `None` when the strategy is unavailable.
    pub fn enable(&self, pnp_id: &str) -> Option<StrategyResult> {
        if !self.available {
            return None;
        }
        Some(match self.backend.enable(pnp_id) {
            Ok(()) => StrategyResult::ok(StrategyKind::Instance, format!("enabled {}", pnp_id)),
            Err(e) => StrategyResult::failed(StrategyKind::Instance, e.to_string()),
        })
    }

    /// Disable one instance. `None` when the strategy is unavailable.
    pub fn disable(&self, pnp_id: &str) -> Option<StrategyResult> {
        if !self.available {
            return None;
        }
        Some(match self.backend.disable(pnp_id) {
            Ok(()) => StrategyResult::ok(StrategyKind::Instance, format!("disabled {}", pnp_id)),
            Err(e) => StrategyResult::failed(StrategyKind::Instance, e.to_string()),
        })
    }

    pub fn is_disabled(&self, pnp_id: &str) -> Option<bool> {
        if !self.available {
            return None;
        }
        self.backend.is_disabled(pnp_id).ok()
    }

    /// Enable every present instance of a hardware identity.
    pub fn enable_matching(&self, hardware: &HardwareId) -> Option<StrategyResult> {
        self.toggle_matching(hardware, false)
    }

    /// Disable every present instance of a hardware identity.
    pub fn disable_matching(&self, hardware: &HardwareId) -> Option<StrategyResult> {
        self.toggle_matching(hardware, true)
    }

    fn toggle_matching(&self, hardware: &HardwareId, disable: bool) -> Option<StrategyResult> {
        if !self.available {
            return None;
        }
        let verb = if disable { "disable" } else { "enable" };

        let instances = match self.backend.list_instances() {
            Ok(instances) => instances,
            Err(e) => {
                return Some(StrategyResult::failed(
                    StrategyKind::Instance,
                    format!("enumeration failed: {}", e),
                ))
            }
        };

        let matching: Vec<_> = instances
            .into_iter()
            .filter(|i| {
                parse_raw_id(&i.pnp_id)
                    .map(|p| {
                        p.hardware.vendor_id == hardware.vendor_id
                            && p.hardware.product_id == hardware.product_id
                    })
                    .unwrap_or(false)
            })
            .collect();

        if matching.is_empty() {
            return Some(StrategyResult::ok(
                StrategyKind::Instance,
                format!("no present instances of {}", hardware),
            ));
        }

        let mut failures = Vec::new();
        let mut toggled = 0usize;
        for info in &matching {
            let res = if disable {
                self.backend.disable(&info.pnp_id)
            } else {
                self.backend.enable(&info.pnp_id)
            };
            match res {
                Ok(()) => toggled += 1,
                Err(e) => failures.push(format!("{}: {}", info.pnp_id, e)),
            }
        }

        Some(if failures.is_empty() {
            StrategyResult::ok(
                StrategyKind::Instance,
                format!("{}d {} instance(s) of {}", verb, toggled, hardware),
            )
        } else {
            StrategyResult::failed(
                StrategyKind::Instance,
                format!(
                    "{}d {}/{} instance(s) of {}; failures: {}",
                    verb,
                    toggled,
                    matching.len(),
                    hardware,
                    failures.join("; ")
                ),
            )
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::enforcement::backend::MemoryInstanceBackend;

    #[test]
    fn test_unavailable_strategy_returns_none() {
        let backend = Arc::new(MemoryInstanceBackend::new(false));
        let strategy = InstanceStrategy::probe(backend);

        assert!(!strategy.available());
        assert!(strategy.disable("USB\\VID_0781&PID_5567\\SER9").is_none());
        assert!(strategy.disable_matching(&HardwareId::new("0781", "5567")).is_none());
    }

    #[test]
    fn test_disable_matching_targets_all_present_units() {
        let backend = Arc::new(MemoryInstanceBackend::new(true));
        backend.register("USB\\VID_0781&PID_5567\\UNIT1", "Stick 1");
        backend.register("USB\\VID_0781&PID_5567\\UNIT2", "Stick 2");
        backend.register("USB\\VID_046D&PID_C52B\\MOUSE", "Mouse");

        let strategy = InstanceStrategy::probe(backend.clone());
        let result = strategy.disable_matching(&HardwareId::new("0781", "5567")).unwrap();
        assert!(result.success);

        assert!(backend.is_disabled("USB\\VID_0781&PID_5567\\UNIT1").unwrap());
        assert!(backend.is_disabled("USB\\VID_0781&PID_5567\\UNIT2").unwrap());
        assert!(!backend.is_disabled("USB\\VID_046D&PID_C52B\\MOUSE").unwrap());
    }

    #[test]
    fn test_no_present_instances_is_success() {
        let backend = Arc::new(MemoryInstanceBackend::new(true));
        let strategy = InstanceStrategy::probe(backend);
        let result = strategy.disable_matching(&HardwareId::new("0781", "5567")).unwrap();
        assert!(result.success);
    }

    #[test]
    fn test_partial_failure_reported() {
        let backend = Arc::new(MemoryInstanceBackend::new(true));
        backend.register("USB\\VID_0781&PID_5567\\UNIT1", "Stick 1");
        let strategy = InstanceStrategy::probe(backend.clone());

        backend.fail_all(true);
        let result = strategy.disable_matching(&HardwareId::new("0781", "5567")).unwrap();
        assert!(!result.success);
    }
}
