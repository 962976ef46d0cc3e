//! Per-Device Authorization Pipeline
//!
//! The strictly sequential discover → enforce → authenticate →
//! final-enforce flow for one device. Any fault anywhere lands the
//! device in `Blocked`; there is no path that leaves a device in
//! `Authenticating` indefinitely.

use std::sync::atomic::Ordering;
use std::time::Instant;

use super::traits::ChallengeOutcome;
use super::AuthorizationEngine;
use crate::logic::device::{Device, DeviceClass, DeviceStatus};
use crate::logic::events::{AuthMethod, EngineEventKind};
use crate::logic::identity::{parse_raw_id, ParsedDeviceId};
use crate::logic::retry::BoundedRetry;

impl AuthorizationEngine {
    /// Entry point for one OS insertion event. Contains every failure:
    /// nothing escapes into the dispatch loop.
    pub async fn handle_insertion(&self, raw_id: &str, display_name: &str, class_guid: &str) {
        let Some(parsed) = parse_raw_id(raw_id) else {
            log::debug!("Ignoring non-applicable device id {}", raw_id);
            return;
        };
        let class = DeviceClass::from_class_guid(class_guid);
        self.observed.fetch_add(1, Ordering::Relaxed);

        let device = Device::new(&parsed, display_name, class);
        log::info!(
            "Device observed: {} ({}) class={} composite={}",
            display_name,
            parsed.raw,
            class,
            device.composite
        );
        self.registry.insert(device.clone());
        self.events.emit(EngineEventKind::DeviceObserved {
            device: device.clone(),
        });

        if let Err(fault) = self.authorize(&parsed, device).await {
            log::error!(
                "Pipeline fault for {}: {} - failing closed",
                parsed.raw,
                fault
            );
            self.deny_unit(&parsed, AuthMethod::Failure);
            self.conclude(
                &parsed,
                DeviceStatus::Blocked,
                AuthMethod::Failure,
                &format!("pipeline fault: {}", fault),
            );
        }
    }

    /// The state machine proper. Returns `Err` only for unexpected
    /// faults; every expected outcome concludes in here.
    async fn authorize(&self, parsed: &ParsedDeviceId, device: Device) -> Result<(), String> {
        let class = device.class;

        // Discovered → PendingEnforcement. Storage is locked out before
        // any further processing - it must never be reachable before a
        // scan completes. HID/Other fall to default policy. Keyboard and
        // mouse stay functional so the user can answer the challenge.
        self.set_status(parsed, DeviceStatus::PendingEnforcement, "insertion observed");
        if !class.functional_while_authenticating() {
            self.lockout(parsed);
        }

        // Deny rules are checked before anything else can grant trust;
        // a deny match is terminal for this connection.
        if self.rules.is_denied(&device) {
            self.deny_unit(parsed, AuthMethod::DenyRule);
            self.conclude(
                parsed,
                DeviceStatus::Blocked,
                AuthMethod::DenyRule,
                "matched enabled deny rule",
            );
            return Ok(());
        }

        // Storage re-enumeration inside the scanned-clean grace window:
        // the enforcement-triggered re-enumeration of a just-scanned
        // device does not force a second scan. The grace instance is
        // consulted for nothing else.
        if class == DeviceClass::Storage && self.storage_grace.is_valid(&parsed.raw) {
            if self.allow_unit(parsed) {
                self.conclude(
                    parsed,
                    DeviceStatus::Trusted,
                    AuthMethod::ScanGrace,
                    "re-enumeration within scanned-clean grace window",
                );
            } else {
                self.deny_unit(parsed, AuthMethod::Failure);
                self.conclude(
                    parsed,
                    DeviceStatus::Blocked,
                    AuthMethod::Failure,
                    "enforcement allow failed inside grace window",
                );
            }
            return Ok(());
        }

        // Allow-rule short-circuit skips authentication for non-storage
        // classes only; storage always re-scans.
        if self.rules.is_allowed(&device) && class != DeviceClass::Storage {
            if self.allow_unit(parsed) {
                self.conclude(
                    parsed,
                    DeviceStatus::Trusted,
                    AuthMethod::AllowRule,
                    "matched enabled allow rule",
                );
            } else {
                self.deny_unit(parsed, AuthMethod::Failure);
                self.conclude(
                    parsed,
                    DeviceStatus::Blocked,
                    AuthMethod::Failure,
                    "enforcement allow failed after allow-rule match",
                );
            }
            return Ok(());
        }

        // Valid cached authentication skips the challenge for keyboard
        // and mouse. Storage never reaches this: its class is not
        // cacheable and the cache holds no entries for it.
        if class.cacheable() && self.auth_cache.is_valid(&parsed.hardware.canonical()) {
            if self.allow_unit(parsed) {
                self.conclude(
                    parsed,
                    DeviceStatus::Trusted,
                    AuthMethod::CachedAuthentication,
                    "valid cached authentication",
                );
            } else {
                self.deny_unit(parsed, AuthMethod::Failure);
                self.conclude(
                    parsed,
                    DeviceStatus::Blocked,
                    AuthMethod::Failure,
                    "enforcement allow failed on cache hit",
                );
            }
            return Ok(());
        }

        self.set_status(parsed, DeviceStatus::Authenticating, "no rule or cache verdict");

        if class == DeviceClass::Storage {
            self.storage_flow(parsed, &device).await
        } else {
            self.challenge_flow(parsed, &device).await
        }
    }

    // ------------------------------------------------------------------
    // Challenge flow (Keyboard / Mouse / HID / Other)
    // ------------------------------------------------------------------

    async fn challenge_flow(&self, parsed: &ParsedDeviceId, device: &Device) -> Result<(), String> {
        let service = self.challenge.clone();
        let dev = device.clone();
        let retry = BoundedRetry::new(
            self.config.challenge_attempts,
            self.config.challenge_backoff(),
        );

        let outcome = tokio::task::spawn_blocking(move || {
            retry.run("challenge display", || service.challenge(&dev))
        })
        .await
        .map_err(|e| format!("challenge task failed: {}", e))?;

        match outcome {
            None => {
                // Display kept failing; a UI failure never grants trust.
                self.deny_unit(parsed, AuthMethod::Challenge);
                self.conclude(
                    parsed,
                    DeviceStatus::Blocked,
                    AuthMethod::Challenge,
                    "challenge could not be presented",
                );
            }
            Some(ChallengeOutcome::Allow) => {
                if self.allow_unit(parsed) {
                    if device.class.cacheable() {
                        self.auth_cache
                            .put(&parsed.hardware.canonical(), device.class);
                    }
                    self.conclude(
                        parsed,
                        DeviceStatus::Trusted,
                        AuthMethod::Challenge,
                        "challenge accepted",
                    );
                } else {
                    self.deny_unit(parsed, AuthMethod::Failure);
                    self.conclude(
                        parsed,
                        DeviceStatus::Blocked,
                        AuthMethod::Failure,
                        "enforcement allow failed after accepted challenge",
                    );
                }
            }
            Some(ChallengeOutcome::Deny) => {
                self.deny_unit(parsed, AuthMethod::Challenge);
                self.conclude(
                    parsed,
                    DeviceStatus::Blocked,
                    AuthMethod::Challenge,
                    "challenge rejected",
                );
            }
            Some(ChallengeOutcome::TimedOut) => {
                self.deny_unit(parsed, AuthMethod::Challenge);
                self.conclude(
                    parsed,
                    DeviceStatus::Blocked,
                    AuthMethod::Challenge,
                    "challenge timed out",
                );
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Storage flow (mount wait → scan → verdict)
    // ------------------------------------------------------------------

    async fn storage_flow(&self, parsed: &ParsedDeviceId, device: &Device) -> Result<(), String> {
        let Some(root) = self.wait_for_volume(device).await? else {
            self.deny_unit(parsed, AuthMethod::Scan);
            self.conclude(
                parsed,
                DeviceStatus::Blocked,
                AuthMethod::Scan,
                "scan incomplete: volume never mounted within wait window",
            );
            return Ok(());
        };

        let scanner = self.scanner.clone();
        let result = tokio::task::spawn_blocking(move || scanner.scan(&root))
            .await
            .map_err(|e| format!("scan task failed: {}", e))?;

        for record in &result.threats {
            self.events.emit(EngineEventKind::ThreatFound {
                raw_id: parsed.raw.clone(),
                record: record.clone(),
            });
        }

        if !result.completed {
            self.deny_unit(parsed, AuthMethod::Scan);
            self.conclude(
                parsed,
                DeviceStatus::Blocked,
                AuthMethod::Scan,
                &format!(
                    "scan incomplete: {}",
                    result.error.as_deref().unwrap_or("unknown cause")
                ),
            );
        } else if result.exceeds(&self.config.verdict) {
            self.deny_unit(parsed, AuthMethod::Scan);
            self.conclude(
                parsed,
                DeviceStatus::Blocked,
                AuthMethod::Scan,
                &format!(
                    "threats detected: {} finding(s) in {} file(s)",
                    result.threats.len(),
                    result.files_scanned
                ),
            );
        } else if result.threats.is_empty() {
            if self.allow_unit(parsed) {
                // Only a short grace for the enforcement-triggered
                // re-enumeration; the next real insertion rescans.
                self.storage_grace.put(&parsed.raw, DeviceClass::Storage);
                self.conclude(
                    parsed,
                    DeviceStatus::Trusted,
                    AuthMethod::Scan,
                    &format!("scan clean: {} file(s)", result.files_scanned),
                );
            } else {
                self.deny_unit(parsed, AuthMethod::Failure);
                self.conclude(
                    parsed,
                    DeviceStatus::Blocked,
                    AuthMethod::Failure,
                    "enforcement allow failed after clean scan",
                );
            }
        } else {
            // Completed scan, findings below the blocking thresholds:
            // not confidently clean, not provably hostile. The operator
            // can re-evaluate without a replug; the device stays denied.
            self.conclude(
                parsed,
                DeviceStatus::Quarantined,
                AuthMethod::Scan,
                &format!(
                    "low-confidence verdict: {} finding(s) under blocking thresholds",
                    result.threats.len()
                ),
            );
        }
        Ok(())
    }

    /// Poll the volume resolver until the drive mounts or the wait
    /// window closes.
    async fn wait_for_volume(
        &self,
        device: &Device,
    ) -> Result<Option<std::path::PathBuf>, String> {
        let deadline = Instant::now() + self.config.mount_wait();
        loop {
            let volumes = self.volumes.clone();
            let dev = device.clone();
            let found = tokio::task::spawn_blocking(move || volumes.find_mounted_volume(&dev))
                .await
                .map_err(|e| format!("volume resolver task failed: {}", e))?;
            if found.is_some() {
                return Ok(found);
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.config.mount_poll()).await;
        }
    }

    // ------------------------------------------------------------------
    // Enforcement helpers
    // ------------------------------------------------------------------

    /// Pre-decision system-level deny: applied before authentication for
    /// classes that must not be reachable while the verdict is pending.
    /// No terminal state and no decision events; those come later.
    fn lockout(&self, parsed: &ParsedDeviceId) {
        let outcome = self.enforcement.deny(&parsed.hardware);
        self.registry.update(&parsed.raw, |d| {
            d.system_level_blocked = outcome.succeeded();
        });
    }

    /// Terminal deny for the device and, for a composite interface, its
    /// whole unit: the shared identity (which covers the parent) plus an
    /// explicit instance-disable and blocked status for every live
    /// sibling. Blocking one interface while a sibling stays live would
    /// defeat the control.
    pub(crate) fn deny_unit(&self, parsed: &ParsedDeviceId, method: AuthMethod) {
        let outcome = self.enforcement.deny(&parsed.hardware);
        self.registry.update(&parsed.raw, |d| {
            d.system_level_blocked = outcome.succeeded();
            d.application_level_blocked = true;
        });

        if parsed.is_composite_interface() {
            for sibling in self.registry.siblings_of(parsed) {
                let _ = self.enforcement.disable_instance(&sibling.raw_id);
                self.registry.update(&sibling.raw_id, |d| {
                    d.system_level_blocked = true;
                    d.mark_blocked();
                });
                if let Some(updated) = self.registry.get(&sibling.raw_id) {
                    self.blocked.fetch_add(1, Ordering::Relaxed);
                    log::info!(
                        "{} → {} (sibling of blocked composite unit)",
                        updated.raw_id,
                        DeviceStatus::Blocked
                    );
                    self.events.emit(EngineEventKind::AuthorizationDecided {
                        device: updated,
                        verdict: DeviceStatus::Blocked,
                        method,
                        reason: "sibling interface of a blocked composite unit".to_string(),
                    });
                }
            }
        }
    }

    /// Allow the identity; true when at least one strategy applied it.
    pub(crate) fn allow_unit(&self, parsed: &ParsedDeviceId) -> bool {
        let outcome = self.enforcement.allow(&parsed.hardware);
        let ok = outcome.succeeded();
        self.registry.update(&parsed.raw, |d| {
            d.system_level_blocked = !ok;
        });
        ok
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    fn set_status(&self, parsed: &ParsedDeviceId, status: DeviceStatus, evidence: &str) {
        self.registry.update(&parsed.raw, |d| d.status = status);
        log::info!("{} → {} ({})", parsed.raw, status, evidence);
    }

    /// Reach a terminal state, emit the decision, bump counters. Every
    /// call logs the triggering evidence.
    pub(crate) fn conclude(
        &self,
        parsed: &ParsedDeviceId,
        verdict: DeviceStatus,
        method: AuthMethod,
        reason: &str,
    ) {
        self.registry.update(&parsed.raw, |d| match verdict {
            DeviceStatus::Trusted => d.mark_trusted(),
            DeviceStatus::Quarantined => d.mark_quarantined(),
            _ => d.mark_blocked(),
        });

        match verdict {
            DeviceStatus::Trusted => self.trusted.fetch_add(1, Ordering::Relaxed),
            DeviceStatus::Quarantined => self.quarantined.fetch_add(1, Ordering::Relaxed),
            _ => self.blocked.fetch_add(1, Ordering::Relaxed),
        };

        log::info!(
            "{} → {} via {} ({})",
            parsed.raw,
            verdict,
            method.as_str(),
            reason
        );

        match self.registry.get(&parsed.raw) {
            Some(device) => self.events.emit(EngineEventKind::AuthorizationDecided {
                device,
                verdict,
                method,
                reason: reason.to_string(),
            }),
            // Removed mid-pipeline; the verdict still happened and the
            // enforcement state stands, only the record is gone.
            None => log::debug!("{} concluded after removal", parsed.raw),
        }
    }
}
