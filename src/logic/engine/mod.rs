//! Device Authorization Engine Module
//!
//! State machine điều phối toàn bộ vòng đời của một thiết bị:
//! discover → enforce → authenticate → final-enforce. Mọi thiết bị không
//! đạt verdict Trusted dứt khoát đều kết thúc ở Blocked/Quarantined -
//! fail-closed là luật duy nhất cho mọi error path.
//!
//! ## Structure
//! - `traits`: consumed collaborator interfaces (events, challenge, volumes)
//! - `pipeline`: the per-device authorization pipeline
//!
//! ## Pipeline
//! Inserted → `Discovered` → `PendingEnforcement` (storage/HID locked out
//! up front) → rule lookup → cache lookup (keyboard/mouse) →
//! `Authenticating` (challenge | scan) → `{Trusted, Blocked, Quarantined}`
//!
//! Each insertion runs as its own task; a slow scan on one device never
//! delays another device's pipeline.

#![allow(dead_code)]

pub mod pipeline;
pub mod traits;

#[cfg(test)]
mod tests;

pub use traits::{
    AutoDenyChallenge, ChallengeOutcome, ChallengeService, DeviceEvent, SystemVolumeResolver,
    VolumeResolver,
};

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::auth_cache::AuthCache;
use super::config::EngineConfig;
use super::device::{DeviceRegistry, DeviceStatus};
use super::enforcement::Enforcement;
use super::events::{EngineEventKind, EventBus};
use super::rules::RuleStore;
use super::scanner::Scanner;

// ============================================================================
// ENGINE
// ============================================================================

/// The orchestrator. One instance per process, created at startup and
/// shared by `Arc`; no process-wide statics.
pub struct AuthorizationEngine {
    pub(crate) config: EngineConfig,
    pub(crate) registry: Arc<DeviceRegistry>,
    pub(crate) rules: Arc<RuleStore>,
    pub(crate) auth_cache: Arc<AuthCache>,
    pub(crate) storage_grace: Arc<AuthCache>,
    pub(crate) scanner: Arc<Scanner>,
    pub(crate) enforcement: Arc<Enforcement>,
    pub(crate) challenge: Arc<dyn ChallengeService>,
    pub(crate) volumes: Arc<dyn VolumeResolver>,
    pub(crate) events: EventBus,

    started_at: DateTime<Utc>,
    pub(crate) observed: AtomicU64,
    pub(crate) trusted: AtomicU64,
    pub(crate) blocked: AtomicU64,
    pub(crate) quarantined: AtomicU64,
}

impl AuthorizationEngine {
    pub fn new(
        config: EngineConfig,
        rules: Arc<RuleStore>,
        enforcement: Arc<Enforcement>,
        challenge: Arc<dyn ChallengeService>,
        volumes: Arc<dyn VolumeResolver>,
        events: EventBus,
    ) -> Arc<Self> {
        let auth_cache = Arc::new(AuthCache::for_authentication(config.auth_ttl()));
        let storage_grace = Arc::new(AuthCache::for_storage_grace(config.storage_grace()));
        let scanner = Arc::new(Scanner::from_config(&config));

        if enforcement.degraded() {
            events.emit(EngineEventKind::EnforcementDegraded {
                reason: "instance strategy unavailable at startup".to_string(),
            });
        }

        Arc::new(Self {
            config,
            registry: Arc::new(DeviceRegistry::new()),
            rules,
            auth_cache,
            storage_grace,
            scanner,
            enforcement,
            challenge,
            volumes,
            events,
            started_at: Utc::now(),
            observed: AtomicU64::new(0),
            trusted: AtomicU64::new(0),
            blocked: AtomicU64::new(0),
            quarantined: AtomicU64::new(0),
        })
    }

    /// Dispatch loop. Insertions fan out into their own tasks so device
    /// pipelines never serialize behind each other; removals are cheap
    /// and handled inline.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<DeviceEvent>) {
        log::info!("Authorization engine loop started");
        while let Some(event) = events.recv().await {
            match event {
                DeviceEvent::Inserted {
                    raw_id,
                    display_name,
                    class_guid,
                } => {
                    let engine = self.clone();
                    tokio::spawn(async move {
                        engine
                            .handle_insertion(&raw_id, &display_name, &class_guid)
                            .await;
                    });
                }
                DeviceEvent::Removed { raw_id } => self.handle_removal(&raw_id),
            }
        }
        log::info!("Device event channel closed, engine loop exiting");
    }

    /// OS removal: discard the in-memory record. Enforcement state
    /// already applied to the OS persists on its own.
    pub fn handle_removal(&self, raw_id: &str) {
        let raw_id = raw_id.trim().to_uppercase();
        match self.registry.remove(&raw_id) {
            Some(device) => {
                log::info!(
                    "Device removed: {} ({}) last status {}",
                    device.display_name,
                    raw_id,
                    device.status
                );
                self.events.emit(EngineEventKind::DeviceRemoved { raw_id });
            }
            None => log::debug!("Removal for untracked id {}", raw_id),
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn auth_cache(&self) -> &AuthCache {
        &self.auth_cache
    }

    pub fn storage_grace(&self) -> &AuthCache {
        &self.storage_grace
    }

    /// Shared handle for the periodic sweeper task.
    pub fn auth_cache_handle(&self) -> Arc<AuthCache> {
        self.auth_cache.clone()
    }

    /// Shared handle for the periodic sweeper task.
    pub fn storage_grace_handle(&self) -> Arc<AuthCache> {
        self.storage_grace.clone()
    }

    /// Status view for the shell around the engine.
    pub fn status_snapshot(&self) -> serde_json::Value {
        let counts = self.registry.status_counts();
        let count_of = |s: DeviceStatus| counts.get(&s).copied().unwrap_or(0);

        serde_json::json!({
            "app": crate::constants::APP_NAME,
            "version": crate::constants::APP_VERSION,
            "uptime_secs": (Utc::now() - self.started_at).num_seconds(),
            "degraded": self.enforcement.degraded(),
            "live_devices": self.registry.len(),
            "by_status": {
                "authenticating": count_of(DeviceStatus::Authenticating),
                "trusted": count_of(DeviceStatus::Trusted),
                "blocked": count_of(DeviceStatus::Blocked),
                "quarantined": count_of(DeviceStatus::Quarantined),
            },
            "totals": {
                "observed": self.observed.load(Ordering::Relaxed),
                "trusted": self.trusted.load(Ordering::Relaxed),
                "blocked": self.blocked.load(Ordering::Relaxed),
                "quarantined": self.quarantined.load(Ordering::Relaxed),
            },
            "auth_cache_entries": self.auth_cache.count(),
            "events_dropped": self.events.dropped_count(),
        })
    }
}
