//! Central Configuration Constants
//!
//! Single source of truth for all configuration defaults.
//! Runtime-tunable values live in `logic::config::EngineConfig`; this file
//! only holds the defaults they start from.

/// Raw PnP id prefix for removable USB hardware. Ids without this prefix
/// are not applicable to the engine and are ignored.
pub const USB_BUS_PREFIX: &str = "USB\\";

/// Default authentication TTL for Keyboard/Mouse results (seconds)
pub const DEFAULT_AUTH_TTL_SECS: u64 = 300;

/// Default scanned-clean grace window for Storage devices (seconds)
pub const DEFAULT_STORAGE_GRACE_SECS: u64 = 60;

/// Default scan wall-clock budget (seconds)
pub const DEFAULT_SCAN_BUDGET_SECS: u64 = 180;

/// Default scan file-count ceiling
pub const DEFAULT_SCAN_FILE_CEILING: usize = 10_000;

/// Default scan worker pool size
pub const DEFAULT_SCAN_WORKERS: usize = 4;

/// Files above this size get metadata-only checks (bytes)
pub const DEFAULT_LARGE_FILE_CAP: u64 = 50 * 1024 * 1024;

/// Default volume mount wait window (seconds)
pub const DEFAULT_MOUNT_WAIT_SECS: u64 = 15;

/// Default volume mount poll interval (milliseconds)
pub const DEFAULT_MOUNT_POLL_MS: u64 = 500;

/// Default challenge display attempts before fail-closed deny
pub const DEFAULT_CHALLENGE_ATTEMPTS: u32 = 3;

/// Default backoff between challenge display attempts (milliseconds)
pub const DEFAULT_CHALLENGE_BACKOFF_MS: u64 = 1_000;

/// Default bounded event channel capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name
pub const APP_NAME: &str = "USB-Shield";

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// Get rule-store directory from environment or use the platform data dir
pub fn get_rules_dir() -> std::path::PathBuf {
    std::env::var("USB_SHIELD_RULES_DIR")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::data_local_dir()
                .unwrap_or_else(|| std::path::PathBuf::from("."))
                .join("usb-shield")
                .join("rules")
        })
}

/// Get engine config file path from environment, if set
pub fn get_config_path() -> Option<std::path::PathBuf> {
    std::env::var("USB_SHIELD_CONFIG")
        .ok()
        .map(std::path::PathBuf::from)
}
