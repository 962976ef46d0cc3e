//! USB Shield Core - Main Entry Point
//!
//! Headless service wiring: config, rule store, enforcement backends,
//! the authorization engine, and the event consumer that persists
//! allow-rules for challenge-authenticated devices. The interactive
//! challenge UI and tray shell attach from outside; until then the
//! default collaborator denies every challenge (fail-closed).

mod logic;
pub mod constants;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use logic::auth_cache;
use logic::config::EngineConfig;
use logic::enforcement::{Enforcement, HostInstanceBackend, HostPolicyBackend, InstanceBackend};
use logic::engine::{AuthorizationEngine, AutoDenyChallenge, DeviceEvent, SystemVolumeResolver};
use logic::events::{EngineEventKind, EventBus};
use logic::rules::RuleStore;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!(
        "Starting {} v{} (device authorization core)...",
        constants::APP_NAME,
        constants::APP_VERSION
    );

    // Configuration
    let config = match constants::get_config_path() {
        Some(path) => match EngineConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                log::error!("{}", e);
                std::process::exit(1);
            }
        },
        None => EngineConfig::default(),
    };

    // Rule store + external-edit watcher
    let rules_dir = constants::get_rules_dir();
    let rules = Arc::new(RuleStore::load(&rules_dir));
    let _rule_watcher = match logic::rules::spawn_watcher(rules.clone(), &rules_dir) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            log::warn!("Rule watcher unavailable: {}", e);
            None
        }
    };

    // Enforcement: dual strategy, instance capability probed once
    let policy_backend = Arc::new(HostPolicyBackend::new());
    let instance_backend = Arc::new(HostInstanceBackend::new());
    let enforcement = Arc::new(Enforcement::new(
        policy_backend,
        instance_backend.clone(),
    ));
    if enforcement.degraded() {
        log::warn!("Running degraded: policy-list enforcement only");
    }

    // Event channel + engine
    let (bus, events_rx) = EventBus::new(config.event_capacity);
    let engine = AuthorizationEngine::new(
        config,
        rules.clone(),
        enforcement,
        Arc::new(AutoDenyChallenge),
        Arc::new(SystemVolumeResolver),
        bus,
    );

    // Periodic cache sweeps (reads stay correct without them)
    let _ = auth_cache::spawn_sweeper(engine.auth_cache_handle(), Duration::from_secs(60));
    let _ = auth_cache::spawn_sweeper(engine.storage_grace_handle(), Duration::from_secs(30));

    // Event consumer: logging + allow-rule persistence for
    // challenge-authenticated devices (the engine itself never persists)
    tokio::spawn(consume_events(events_rx, rules));

    // Device notifications from the host, fed into the engine loop
    let (tx, device_rx) = mpsc::channel::<DeviceEvent>(64);
    tokio::spawn(poll_device_events(instance_backend, tx));

    engine.run(device_rx).await;
}

/// Drain the engine's event sink: log every event, persist an allow rule
/// when a non-storage device passed its interactive challenge.
async fn consume_events(
    mut rx: mpsc::Receiver<logic::events::EngineEvent>,
    rules: Arc<RuleStore>,
) {
    use logic::device::DeviceStatus;
    use logic::events::AuthMethod;

    while let Some(event) = rx.recv().await {
        match &event.kind {
            EngineEventKind::AuthorizationDecided {
                device,
                verdict,
                method,
                reason,
            } => {
                log::info!(
                    "[decision] {} {} via {} ({})",
                    device.raw_id,
                    verdict,
                    method.as_str(),
                    reason
                );
                if *verdict == DeviceStatus::Trusted && *method == AuthMethod::Challenge {
                    if let Err(e) = rules.add_allow(device, "authenticated by user challenge", "usb-shield") {
                        log::error!("Allow-rule persistence failed: {}", e);
                    }
                }
            }
            EngineEventKind::ThreatFound { raw_id, record } => {
                log::warn!(
                    "[threat] {} {} {:?}: {}",
                    raw_id,
                    record.tier,
                    record.path,
                    record.reason
                );
            }
            EngineEventKind::DeviceObserved { device } => {
                log::info!("[observed] {} ({})", device.display_name, device.raw_id);
            }
            EngineEventKind::DeviceRemoved { raw_id } => {
                log::info!("[removed] {}", raw_id);
            }
            EngineEventKind::EnforcementDegraded { reason } => {
                log::warn!("[degraded] {}", reason);
            }
        }
    }
}

/// Minimal host device event source: diff the present instance list on a
/// short interval. Class information is not available through this
/// surface, so devices arrive as `Other` and fall to default policy -
/// the attached shell replaces this with real OS notifications.
async fn poll_device_events(
    backend: Arc<HostInstanceBackend>,
    tx: mpsc::Sender<DeviceEvent>,
) {
    let mut known: HashSet<String> = HashSet::new();
    let mut first_pass = true;
    let mut tick = tokio::time::interval(Duration::from_secs(2));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tick.tick().await;
        let snapshot = {
            let backend = backend.clone();
            tokio::task::spawn_blocking(move || backend.list_instances()).await
        };
        let instances = match snapshot {
            Ok(Ok(instances)) => instances,
            Ok(Err(e)) => {
                log::debug!("Device poll failed: {}", e);
                continue;
            }
            Err(e) => {
                log::warn!("Device poll task failed: {}", e);
                continue;
            }
        };

        let present: HashSet<String> = instances.iter().map(|i| i.pnp_id.clone()).collect();

        // Devices present at startup are not new insertions
        if first_pass {
            known = present;
            first_pass = false;
            log::info!("Device baseline: {} present instance(s)", known.len());
            continue;
        }

        for info in &instances {
            if !known.contains(&info.pnp_id) {
                let _ = tx
                    .send(DeviceEvent::Inserted {
                        raw_id: info.pnp_id.clone(),
                        display_name: info.description.clone(),
                        class_guid: String::new(),
                    })
                    .await;
            }
        }
        for gone in known.difference(&present) {
            let _ = tx.send(DeviceEvent::Removed { raw_id: gone.clone() }).await;
        }
        known = present;
    }
}
