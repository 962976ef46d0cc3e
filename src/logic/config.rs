//! Engine Configuration
//!
//! Tunable knobs for the authorization engine, scanner, and cache.
//! Can be loaded from a JSON config file or constructed at runtime.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::constants::*;

// ============================================================================
// VERDICT THRESHOLDS
// ============================================================================

/// Aggregation thresholds deciding when a scan result counts as "threats
/// detected". A policy knob, not a scanner invariant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VerdictThresholds {
    /// Any CRITICAL finding blocks
    pub block_on_critical: bool,
    /// This many HIGH findings block
    pub high_count: usize,
    /// This many MEDIUM findings block
    pub medium_count: usize,
}

impl Default for VerdictThresholds {
    fn default() -> Self {
        Self {
            block_on_critical: true,
            high_count: 3,
            medium_count: 5,
        }
    }
}

// ============================================================================
// ENGINE CONFIG
// ============================================================================

/// Complete engine configuration (can be loaded from config file).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Authentication TTL for Keyboard/Mouse results (seconds)
    pub auth_ttl_secs: u64,
    /// Scanned-clean grace window for Storage (seconds). Never consulted
    /// as a skip-authentication signal.
    pub storage_grace_secs: u64,
    /// Scan wall-clock budget (seconds)
    pub scan_budget_secs: u64,
    /// Scan file-count ceiling
    pub scan_file_ceiling: usize,
    /// Scan worker pool size
    pub scan_workers: usize,
    /// Files above this size get metadata-only checks (bytes)
    pub large_file_cap: u64,
    /// Volume mount wait window (seconds)
    pub mount_wait_secs: u64,
    /// Volume mount poll interval (milliseconds)
    pub mount_poll_ms: u64,
    /// Challenge display attempts before fail-closed deny
    pub challenge_attempts: u32,
    /// Backoff between challenge display attempts (milliseconds)
    pub challenge_backoff_ms: u64,
    /// Bounded event channel capacity
    pub event_capacity: usize,
    /// Scan verdict aggregation thresholds
    pub verdict: VerdictThresholds,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auth_ttl_secs: DEFAULT_AUTH_TTL_SECS,
            storage_grace_secs: DEFAULT_STORAGE_GRACE_SECS,
            scan_budget_secs: DEFAULT_SCAN_BUDGET_SECS,
            scan_file_ceiling: DEFAULT_SCAN_FILE_CEILING,
            scan_workers: DEFAULT_SCAN_WORKERS,
            large_file_cap: DEFAULT_LARGE_FILE_CAP,
            mount_wait_secs: DEFAULT_MOUNT_WAIT_SECS,
            mount_poll_ms: DEFAULT_MOUNT_POLL_MS,
            challenge_attempts: DEFAULT_CHALLENGE_ATTEMPTS,
            challenge_backoff_ms: DEFAULT_CHALLENGE_BACKOFF_MS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            verdict: VerdictThresholds::default(),
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file. A missing or unreadable file means full
    /// defaults; a present-but-invalid file is an error the caller should
    /// surface rather than silently mask.
    pub fn load(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            log::info!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config {:?}: {}", path, e))?;
        serde_json::from_str(&text)
            .map_err(|e| format!("Failed to parse config {:?}: {}", path, e))
    }

    pub fn auth_ttl(&self) -> Duration {
        Duration::from_secs(self.auth_ttl_secs)
    }

    pub fn storage_grace(&self) -> Duration {
        Duration::from_secs(self.storage_grace_secs)
    }

    pub fn scan_budget(&self) -> Duration {
        Duration::from_secs(self.scan_budget_secs)
    }

    pub fn mount_wait(&self) -> Duration {
        Duration::from_secs(self.mount_wait_secs)
    }

    pub fn mount_poll(&self) -> Duration {
        Duration::from_millis(self.mount_poll_ms)
    }

    pub fn challenge_backoff(&self) -> Duration {
        Duration::from_millis(self.challenge_backoff_ms)
    }
}

// ============================================================================
// TESTS
// ============================================================================
