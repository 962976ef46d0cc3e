//! Engine Scenario Tests
//!
//! Drives the full pipeline with fake collaborators: scripted challenge,
//! fixed volume resolver, in-memory enforcement backends, temp rule
//! files. No real OS surface is touched.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::traits::{ChallengeOutcome, ChallengeService, VolumeResolver};
use super::AuthorizationEngine;
use crate::logic::config::EngineConfig;
use crate::logic::device::{Device, DeviceClass, DeviceStatus};
use crate::logic::enforcement::{
    Enforcement, InstanceBackend, MemoryInstanceBackend, MemoryPolicyBackend,
};
use crate::logic::events::{AuthMethod, EngineEvent, EngineEventKind, EventBus};
use crate::logic::identity::HardwareId;
use crate::logic::rules::{Rule, RuleList, RuleStore};

const MOUSE_GUID: &str = "{4D36E96F-E325-11CE-BFC1-08002BE10318}";
const KEYBOARD_GUID: &str = "{4D36E96B-E325-11CE-BFC1-08002BE10318}";
const HID_GUID: &str = "{745A17A0-74D3-11D0-B6FE-00A0C90F57DA}";
const DISK_GUID: &str = "{4D36E967-E325-11CE-BFC1-08002BE10318}";

const MOUSE_ID: &str = "USB\\VID_046D&PID_C52B\\SER1";
const STICK_ID: &str = "USB\\VID_0781&PID_5567\\STICK1";

// ============================================================================
// FAKES
// ============================================================================

struct ScriptedChallenge {
    script: Mutex<VecDeque<Result<ChallengeOutcome, String>>>,
    calls: AtomicU64,
}

impl ScriptedChallenge {
    fn new(script: Vec<Result<ChallengeOutcome, String>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicU64::new(0),
        })
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl ChallengeService for ScriptedChallenge {
    fn challenge(&self, _device: &Device) -> Result<ChallengeOutcome, String> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.script
            .lock()
            .pop_front()
            .unwrap_or(Ok(ChallengeOutcome::Deny))
    }
}

struct FixedVolume {
    root: Option<PathBuf>,
    calls: AtomicU64,
}

impl FixedVolume {
    fn mounted(root: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            root: Some(root),
            calls: AtomicU64::new(0),
        })
    }

    fn never_mounts() -> Arc<Self> {
        Arc::new(Self {
            root: None,
            calls: AtomicU64::new(0),
        })
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl VolumeResolver for FixedVolume {
    fn find_mounted_volume(&self, _device: &Device) -> Option<PathBuf> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.root.clone()
    }
}

// ============================================================================
// HARNESS
// ============================================================================

struct Harness {
    engine: Arc<AuthorizationEngine>,
    policy: Arc<MemoryPolicyBackend>,
    instance: Arc<MemoryInstanceBackend>,
    rules: Arc<RuleStore>,
    challenge: Arc<ScriptedChallenge>,
    volumes: Arc<FixedVolume>,
    rx: mpsc::Receiver<EngineEvent>,
    _rules_dir: tempfile::TempDir,
}

impl Harness {
    fn drain(&mut self) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            out.push(event);
        }
        out
    }

    fn decisions(events: &[EngineEvent]) -> Vec<(String, DeviceStatus, AuthMethod)> {
        events
            .iter()
            .filter_map(|e| match &e.kind {
                EngineEventKind::AuthorizationDecided {
                    device,
                    verdict,
                    method,
                    ..
                } => Some((device.raw_id.clone(), *verdict, *method)),
                _ => None,
            })
            .collect()
    }

    fn threat_count(events: &[EngineEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e.kind, EngineEventKind::ThreatFound { .. }))
            .count()
    }
}

fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.mount_wait_secs = 1;
    config.mount_poll_ms = 10;
    config.challenge_backoff_ms = 1;
    config.scan_budget_secs = 30;
    config.scan_workers = 2;
    config
}

fn harness(
    config: EngineConfig,
    script: Vec<Result<ChallengeOutcome, String>>,
    volumes: Arc<FixedVolume>,
) -> Harness {
    let rules_dir = tempfile::tempdir().unwrap();
    let rules = Arc::new(RuleStore::load(rules_dir.path()));
    let policy = Arc::new(MemoryPolicyBackend::new());
    let instance = Arc::new(MemoryInstanceBackend::new(true));
    let enforcement = Arc::new(Enforcement::new(policy.clone(), instance.clone()));
    let challenge = ScriptedChallenge::new(script);
    let (bus, rx) = EventBus::new(64);

    let engine = AuthorizationEngine::new(
        config,
        rules.clone(),
        enforcement,
        challenge.clone(),
        volumes.clone(),
        bus,
    );

    Harness {
        engine,
        policy,
        instance,
        rules,
        challenge,
        volumes,
        rx,
        _rules_dir: rules_dir,
    }
}

fn logitech() -> HardwareId {
    HardwareId::new("046D", "C52B")
}

// ============================================================================
// CHALLENGE SCENARIOS
// ============================================================================

#[tokio::test]
async fn scenario_a_new_mouse_challenge_allow() {
    let mut h = harness(
        test_config(),
        vec![Ok(ChallengeOutcome::Allow)],
        FixedVolume::never_mounts(),
    );

    h.engine.handle_insertion(MOUSE_ID, "USB Mouse", MOUSE_GUID).await;

    let device = h.engine.registry().get(MOUSE_ID).unwrap();
    assert_eq!(device.status, DeviceStatus::Trusted);
    assert!(!device.application_level_blocked);
    assert!(device.authenticated_at.is_some());
    assert_eq!(h.challenge.calls(), 1);

    // Cache entry created for the hardware identity
    assert!(h.engine.auth_cache().is_valid(&logitech().canonical()));
    assert_eq!(
        h.engine.auth_cache().class_of(&logitech().canonical()),
        Some(DeviceClass::Mouse)
    );

    // Enforcement-allow issued
    assert!(h.policy.allow_list_snapshot().contains(&logitech().canonical()));

    let events = h.drain();
    let decisions = Harness::decisions(&events);
    assert_eq!(
        decisions,
        vec![(MOUSE_ID.to_string(), DeviceStatus::Trusted, AuthMethod::Challenge)]
    );
}

#[tokio::test]
async fn scenario_b_reinsert_within_ttl_hits_cache() {
    let mut h = harness(
        test_config(),
        vec![Ok(ChallengeOutcome::Allow)],
        FixedVolume::never_mounts(),
    );

    h.engine.handle_insertion(MOUSE_ID, "USB Mouse", MOUSE_GUID).await;
    h.engine.handle_removal(MOUSE_ID);
    h.engine.handle_insertion(MOUSE_ID, "USB Mouse", MOUSE_GUID).await;

    // No second challenge
    assert_eq!(h.challenge.calls(), 1);
    let device = h.engine.registry().get(MOUSE_ID).unwrap();
    assert_eq!(device.status, DeviceStatus::Trusted);

    let events = h.drain();
    let decisions = Harness::decisions(&events);
    assert_eq!(decisions.last().unwrap().2, AuthMethod::CachedAuthentication);
}

#[tokio::test]
async fn scenario_c_reinsert_after_ttl_rechallenges() {
    let mut config = test_config();
    config.auth_ttl_secs = 1;
    let mut h = harness(
        config,
        vec![Ok(ChallengeOutcome::Allow), Ok(ChallengeOutcome::Allow)],
        FixedVolume::never_mounts(),
    );

    h.engine.handle_insertion(MOUSE_ID, "USB Mouse", MOUSE_GUID).await;
    h.engine.handle_removal(MOUSE_ID);

    tokio::time::sleep(std::time::Duration::from_millis(1200)).await;

    h.engine.handle_insertion(MOUSE_ID, "USB Mouse", MOUSE_GUID).await;
    assert_eq!(h.challenge.calls(), 2, "expired cache must re-challenge");

    let events = h.drain();
    let decisions = Harness::decisions(&events);
    assert_eq!(decisions.last().unwrap().2, AuthMethod::Challenge);
}

#[tokio::test]
async fn challenge_reject_blocks_and_denies() {
    let mut h = harness(
        test_config(),
        vec![Ok(ChallengeOutcome::Deny)],
        FixedVolume::never_mounts(),
    );

    h.engine.handle_insertion(MOUSE_ID, "USB Mouse", MOUSE_GUID).await;

    let device = h.engine.registry().get(MOUSE_ID).unwrap();
    assert_eq!(device.status, DeviceStatus::Blocked);
    assert!(device.application_level_blocked);
    assert!(h.policy.deny_list_snapshot().contains(&logitech().canonical()));
    assert!(!h.engine.auth_cache().is_valid(&logitech().canonical()));

    let events = h.drain();
    assert_eq!(
        Harness::decisions(&events).last().unwrap().1,
        DeviceStatus::Blocked
    );
}

#[tokio::test]
async fn challenge_timeout_blocks() {
    let mut h = harness(
        test_config(),
        vec![Ok(ChallengeOutcome::TimedOut)],
        FixedVolume::never_mounts(),
    );

    h.engine.handle_insertion(MOUSE_ID, "USB Mouse", MOUSE_GUID).await;
    assert_eq!(
        h.engine.registry().get(MOUSE_ID).unwrap().status,
        DeviceStatus::Blocked
    );
    let events = h.drain();
    let decisions = Harness::decisions(&events);
    assert_eq!(decisions.last().unwrap().2, AuthMethod::Challenge);
}

#[tokio::test]
async fn challenge_display_failure_exhausts_retries_then_denies() {
    let mut config = test_config();
    config.challenge_attempts = 3;
    let h = harness(
        config,
        vec![
            Err("dialog failed".to_string()),
            Err("dialog failed".to_string()),
            Err("dialog failed".to_string()),
        ],
        FixedVolume::never_mounts(),
    );

    h.engine.handle_insertion(MOUSE_ID, "USB Mouse", MOUSE_GUID).await;

    assert_eq!(h.challenge.calls(), 3);
    assert_eq!(
        h.engine.registry().get(MOUSE_ID).unwrap().status,
        DeviceStatus::Blocked
    );
}

#[tokio::test]
async fn hid_class_denied_up_front_then_challenge_decides() {
    let h = harness(
        test_config(),
        vec![Ok(ChallengeOutcome::Allow)],
        FixedVolume::never_mounts(),
    );
    let hid_id = "USB\\VID_1234&PID_0001\\HID1";

    h.engine.handle_insertion(hid_id, "Gadget", HID_GUID).await;

    // Allowed after the challenge despite the up-front default deny
    let device = h.engine.registry().get(hid_id).unwrap();
    assert_eq!(device.status, DeviceStatus::Trusted);
    let hw = HardwareId::new("1234", "0001");
    assert!(h.policy.allow_list_snapshot().contains(&hw.canonical()));
    assert!(!h.policy.deny_list_snapshot().contains(&hw.canonical()));
}

// ============================================================================
// RULE SCENARIOS
// ============================================================================

#[tokio::test]
async fn scenario_f_vendor_wide_deny_rule_skips_authentication() {
    let mut h = harness(test_config(), vec![], FixedVolume::never_mounts());

    let mut rule = Rule::for_identity(
        &HardwareId::new("0781", "0000"),
        "banned vendor",
        "known bad",
        "operator",
    );
    rule.product_id = String::new();
    h.rules.add_rule(RuleList::Deny, rule).unwrap();

    h.engine.handle_insertion(STICK_ID, "Flash Drive", DISK_GUID).await;

    let device = h.engine.registry().get(STICK_ID).unwrap();
    assert_eq!(device.status, DeviceStatus::Blocked);
    // No challenge, no scan
    assert_eq!(h.challenge.calls(), 0);
    assert_eq!(h.volumes.calls(), 0);

    let events = h.drain();
    let decisions = Harness::decisions(&events);
    assert_eq!(decisions.last().unwrap().2, AuthMethod::DenyRule);
}

#[tokio::test]
async fn allow_rule_short_circuits_challenge_for_non_storage() {
    let h = harness(test_config(), vec![], FixedVolume::never_mounts());
    h.rules
        .add_rule(
            RuleList::Allow,
            Rule::for_identity(&logitech(), "trusted kbd", "standard issue", "operator"),
        )
        .unwrap();

    h.engine
        .handle_insertion("USB\\VID_046D&PID_C52B\\KBD7", "Keyboard", KEYBOARD_GUID)
        .await;

    assert_eq!(h.challenge.calls(), 0);
    assert_eq!(
        h.engine.registry().get("USB\\VID_046D&PID_C52B\\KBD7").unwrap().status,
        DeviceStatus::Trusted
    );
}

#[tokio::test]
async fn deny_rule_beats_allow_rule() {
    let h = harness(test_config(), vec![], FixedVolume::never_mounts());
    h.rules
        .add_rule(
            RuleList::Allow,
            Rule::for_identity(&logitech(), "allowed", "r", "op"),
        )
        .unwrap();
    h.rules
        .add_rule(
            RuleList::Deny,
            Rule::for_identity(&logitech(), "denied", "r", "op"),
        )
        .unwrap();

    h.engine.handle_insertion(MOUSE_ID, "USB Mouse", MOUSE_GUID).await;
    assert_eq!(
        h.engine.registry().get(MOUSE_ID).unwrap().status,
        DeviceStatus::Blocked
    );
}

#[tokio::test]
async fn allow_rule_never_skips_storage_scan() {
    let volume = tempfile::tempdir().unwrap();
    std::fs::write(volume.path().join("notes.txt"), b"clean").unwrap();

    let mut h = harness(
        test_config(),
        vec![],
        FixedVolume::mounted(volume.path().to_path_buf()),
    );
    h.rules
        .add_rule(
            RuleList::Allow,
            Rule::for_identity(&HardwareId::new("0781", "5567"), "trusted stick", "r", "op"),
        )
        .unwrap();

    h.engine.handle_insertion(STICK_ID, "Flash Drive", DISK_GUID).await;

    // Trusted, but through the scan, not the rule
    assert!(h.volumes.calls() >= 1);
    let events = h.drain();
    let decisions = Harness::decisions(&events);
    assert_eq!(
        decisions.last().unwrap(),
        &(STICK_ID.to_string(), DeviceStatus::Trusted, AuthMethod::Scan)
    );
}

// ============================================================================
// STORAGE SCENARIOS
// ============================================================================

#[tokio::test]
async fn scenario_d_storage_with_critical_threat_blocks() {
    let volume = tempfile::tempdir().unwrap();
    std::fs::write(volume.path().join("autorun.inf"), b"[autorun]").unwrap();

    let mut h = harness(
        test_config(),
        vec![],
        FixedVolume::mounted(volume.path().to_path_buf()),
    );

    h.engine.handle_insertion(STICK_ID, "Flash Drive", DISK_GUID).await;

    let device = h.engine.registry().get(STICK_ID).unwrap();
    assert_eq!(device.status, DeviceStatus::Blocked);
    assert!(h
        .policy
        .deny_list_snapshot()
        .contains(&HardwareId::new("0781", "5567").canonical()));

    let events = h.drain();
    assert_eq!(Harness::threat_count(&events), 1);
    let decisions = Harness::decisions(&events);
    assert_eq!(
        decisions.last().unwrap(),
        &(STICK_ID.to_string(), DeviceStatus::Blocked, AuthMethod::Scan)
    );
}

#[tokio::test]
async fn scenario_e_unmountable_volume_blocks_not_quarantines() {
    let mut config = test_config();
    config.mount_wait_secs = 0;
    let mut h = harness(config, vec![], FixedVolume::never_mounts());

    h.engine.handle_insertion(STICK_ID, "Flash Drive", DISK_GUID).await;

    let device = h.engine.registry().get(STICK_ID).unwrap();
    assert_eq!(device.status, DeviceStatus::Blocked);

    let events = h.drain();
    let reason = events
        .iter()
        .find_map(|e| match &e.kind {
            EngineEventKind::AuthorizationDecided { reason, .. } => Some(reason.clone()),
            _ => None,
        })
        .unwrap();
    assert!(reason.contains("scan incomplete"));
}

#[tokio::test]
async fn storage_clean_scan_trusts_and_sets_grace() {
    let volume = tempfile::tempdir().unwrap();
    std::fs::write(volume.path().join("notes.txt"), b"clean").unwrap();

    let h = harness(
        test_config(),
        vec![],
        FixedVolume::mounted(volume.path().to_path_buf()),
    );

    h.engine.handle_insertion(STICK_ID, "Flash Drive", DISK_GUID).await;

    let device = h.engine.registry().get(STICK_ID).unwrap();
    assert_eq!(device.status, DeviceStatus::Trusted);
    assert!(h.engine.storage_grace().is_valid(STICK_ID));
    // The authentication cache never holds storage entries
    assert_eq!(h.engine.auth_cache().count(), 0);
}

#[tokio::test]
async fn storage_reenumeration_echo_within_grace_skips_rescan() {
    let volume = tempfile::tempdir().unwrap();
    std::fs::write(volume.path().join("notes.txt"), b"clean").unwrap();

    let mut h = harness(
        test_config(),
        vec![],
        FixedVolume::mounted(volume.path().to_path_buf()),
    );

    h.engine.handle_insertion(STICK_ID, "Flash Drive", DISK_GUID).await;
    let scans_after_first = h.volumes.calls();

    // Policy refresh re-announces the device without a removal
    h.engine.handle_insertion(STICK_ID, "Flash Drive", DISK_GUID).await;

    assert_eq!(h.volumes.calls(), scans_after_first, "no second scan inside grace");
    let events = h.drain();
    let decisions = Harness::decisions(&events);
    assert_eq!(decisions.last().unwrap().2, AuthMethod::ScanGrace);
}

#[tokio::test]
async fn no_storage_cache_bypass_across_insertions() {
    let volume = tempfile::tempdir().unwrap();
    std::fs::write(volume.path().join("notes.txt"), b"clean").unwrap();

    let mut config = test_config();
    config.storage_grace_secs = 0;
    let mut h = harness(
        config,
        vec![],
        FixedVolume::mounted(volume.path().to_path_buf()),
    );

    h.engine.handle_insertion(STICK_ID, "Flash Drive", DISK_GUID).await;
    h.engine.handle_removal(STICK_ID);
    h.engine.handle_insertion(STICK_ID, "Flash Drive", DISK_GUID).await;

    // Both insertions ran their own scan flow
    assert_eq!(h.volumes.calls(), 2);
    let events = h.drain();
    let scans: Vec<_> = Harness::decisions(&events)
        .into_iter()
        .filter(|(_, _, m)| *m == AuthMethod::Scan)
        .collect();
    assert_eq!(scans.len(), 2);
    assert!(scans.iter().all(|(_, v, _)| *v == DeviceStatus::Trusted));
}

#[tokio::test]
async fn storage_scan_timeout_blocks() {
    let volume = tempfile::tempdir().unwrap();
    std::fs::write(volume.path().join("notes.txt"), b"clean").unwrap();

    let mut config = test_config();
    config.scan_budget_secs = 0;
    let mut h = harness(
        config,
        vec![],
        FixedVolume::mounted(volume.path().to_path_buf()),
    );

    h.engine.handle_insertion(STICK_ID, "Flash Drive", DISK_GUID).await;

    assert_eq!(
        h.engine.registry().get(STICK_ID).unwrap().status,
        DeviceStatus::Blocked
    );
    let events = h.drain();
    let decisions = Harness::decisions(&events);
    assert_eq!(decisions.last().unwrap().1, DeviceStatus::Blocked);
}

#[tokio::test]
async fn storage_low_confidence_findings_quarantine() {
    let volume = tempfile::tempdir().unwrap();
    // One Medium finding: below every blocking threshold
    std::fs::write(volume.path().join("setup.exe"), b"MZ\x90\x00").unwrap();

    let mut h = harness(
        test_config(),
        vec![],
        FixedVolume::mounted(volume.path().to_path_buf()),
    );

    h.engine.handle_insertion(STICK_ID, "Flash Drive", DISK_GUID).await;

    let device = h.engine.registry().get(STICK_ID).unwrap();
    assert_eq!(device.status, DeviceStatus::Quarantined);
    assert!(device.application_level_blocked);
    assert!(device.quarantined_at.is_some());
    // Still enforced-denied at the OS level
    assert!(h
        .policy
        .deny_list_snapshot()
        .contains(&HardwareId::new("0781", "5567").canonical()));

    let events = h.drain();
    assert_eq!(Harness::threat_count(&events), 1);
}

// ============================================================================
// COMPOSITE / MISC
// ============================================================================

#[tokio::test]
async fn composite_unit_blocked_atomically() {
    // Keyboard plus a vendor-specific control interface on one unit. The
    // control interface is not cacheable, so the keyboard's cached
    // authentication cannot stand in for its own challenge.
    let kbd_id = "USB\\VID_046D&PID_C52B&MI_00\\6&2CBD&0&0000";
    let ctrl_id = "USB\\VID_046D&PID_C52B&MI_01\\6&2CBD&0&0000";

    let mut h = harness(
        test_config(),
        vec![Ok(ChallengeOutcome::Allow), Ok(ChallengeOutcome::Deny)],
        FixedVolume::never_mounts(),
    );
    h.instance.register(kbd_id, "Composite Keyboard");
    h.instance.register(ctrl_id, "Composite Control");

    h.engine.handle_insertion(kbd_id, "Keyboard", KEYBOARD_GUID).await;
    assert_eq!(
        h.engine.registry().get(kbd_id).unwrap().status,
        DeviceStatus::Trusted
    );

    // Rejecting the sibling interface blocks the whole unit
    h.engine.handle_insertion(ctrl_id, "Control", HID_GUID).await;

    let ctrl = h.engine.registry().get(ctrl_id).unwrap();
    let kbd = h.engine.registry().get(kbd_id).unwrap();
    assert_eq!(ctrl.status, DeviceStatus::Blocked);
    assert_eq!(kbd.status, DeviceStatus::Blocked);
    assert!(kbd.system_level_blocked);

    // Shared unit identity deny-listed, both instances disabled
    assert!(h.policy.deny_list_snapshot().contains(&logitech().canonical()));
    assert!(h.instance.is_disabled(kbd_id).unwrap());
    assert!(h.instance.is_disabled(ctrl_id).unwrap());

    let events = h.drain();
    let blocked: Vec<_> = Harness::decisions(&events)
        .into_iter()
        .filter(|(_, v, _)| *v == DeviceStatus::Blocked)
        .collect();
    assert_eq!(blocked.len(), 2, "both interfaces get a blocked decision");
}

#[tokio::test]
async fn non_usb_bus_ids_are_ignored() {
    let mut h = harness(test_config(), vec![], FixedVolume::never_mounts());

    h.engine
        .handle_insertion("PCI\\VEN_8086&DEV_1234", "GPU", "{GUID}")
        .await;

    assert!(h.engine.registry().is_empty());
    assert!(h.drain().is_empty());
}

#[tokio::test]
async fn removal_discards_record_and_emits() {
    let mut h = harness(
        test_config(),
        vec![Ok(ChallengeOutcome::Allow)],
        FixedVolume::never_mounts(),
    );

    h.engine.handle_insertion(MOUSE_ID, "USB Mouse", MOUSE_GUID).await;
    h.engine.handle_removal(MOUSE_ID);

    assert!(h.engine.registry().is_empty());
    let events = h.drain();
    assert!(events
        .iter()
        .any(|e| matches!(&e.kind, EngineEventKind::DeviceRemoved { raw_id } if raw_id == MOUSE_ID)));
}

#[tokio::test]
async fn every_pipeline_ends_terminal() {
    // A mix of devices and verdicts; none may be left mid-pipeline.
    let volume = tempfile::tempdir().unwrap();
    std::fs::write(volume.path().join("autorun.inf"), b"[autorun]").unwrap();

    let h = harness(
        test_config(),
        vec![Ok(ChallengeOutcome::Allow), Ok(ChallengeOutcome::TimedOut)],
        FixedVolume::mounted(volume.path().to_path_buf()),
    );

    h.engine.handle_insertion(MOUSE_ID, "USB Mouse", MOUSE_GUID).await;
    h.engine
        .handle_insertion("USB\\VID_AAAA&PID_0001\\X", "Gadget", HID_GUID)
        .await;
    h.engine.handle_insertion(STICK_ID, "Flash Drive", DISK_GUID).await;

    for device in h.engine.registry().snapshot() {
        assert!(
            device.status.is_terminal(),
            "{} left in {}",
            device.raw_id,
            device.status
        );
    }
}

#[tokio::test]
async fn status_snapshot_reflects_counters() {
    let h = harness(
        test_config(),
        vec![Ok(ChallengeOutcome::Allow), Ok(ChallengeOutcome::Deny)],
        FixedVolume::never_mounts(),
    );

    h.engine.handle_insertion(MOUSE_ID, "USB Mouse", MOUSE_GUID).await;
    h.engine
        .handle_insertion("USB\\VID_AAAA&PID_0001\\X", "Gadget", HID_GUID)
        .await;

    let snapshot = h.engine.status_snapshot();
    assert_eq!(snapshot["live_devices"], 2);
    assert_eq!(snapshot["totals"]["observed"], 2);
    assert_eq!(snapshot["totals"]["trusted"], 1);
    assert_eq!(snapshot["totals"]["blocked"], 1);
    assert_eq!(snapshot["degraded"], false);
}

#[tokio::test]
async fn run_loop_dispatches_concurrently() {
    let volume = tempfile::tempdir().unwrap();
    std::fs::write(volume.path().join("notes.txt"), b"clean").unwrap();

    let h = harness(
        test_config(),
        vec![Ok(ChallengeOutcome::Allow)],
        FixedVolume::mounted(volume.path().to_path_buf()),
    );

    let (tx, rx) = mpsc::channel(16);
    let engine = h.engine.clone();
    let loop_handle = tokio::spawn(engine.run(rx));

    tx.send(super::DeviceEvent::Inserted {
        raw_id: STICK_ID.to_string(),
        display_name: "Flash Drive".to_string(),
        class_guid: DISK_GUID.to_string(),
    })
    .await
    .unwrap();
    tx.send(super::DeviceEvent::Inserted {
        raw_id: MOUSE_ID.to_string(),
        display_name: "USB Mouse".to_string(),
        class_guid: MOUSE_GUID.to_string(),
    })
    .await
    .unwrap();

    // Both pipelines conclude even though they run in parallel
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
    loop {
        let done = h
            .engine
            .registry()
            .snapshot()
            .iter()
            .filter(|d| d.status.is_terminal())
            .count();
        if done == 2 {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "pipelines never concluded");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    drop(tx);
    let _ = loop_handle.await;

    assert_eq!(
        h.engine.registry().get(MOUSE_ID).unwrap().status,
        DeviceStatus::Trusted
    );
    assert_eq!(
        h.engine.registry().get(STICK_ID).unwrap().status,
        DeviceStatus::Trusted
    );
}
