//! Consumed Collaborator Interfaces
//!
//! The engine depends on its external collaborators through these narrow
//! traits so the state machine is testable with fakes that never touch a
//! real OS or a real user.

use std::path::PathBuf;

use crate::logic::device::Device;

// ============================================================================
// DEVICE EVENTS
// ============================================================================

/// One OS device notification.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    Inserted {
        raw_id: String,
        display_name: String,
        class_guid: String,
    },
    Removed {
        raw_id: String,
    },
}

// ============================================================================
// CHALLENGE SERVICE
// ============================================================================

/// What the interactive challenge came back with. The dialog content is
/// the collaborator's business; the engine only consumes the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeOutcome {
    Allow,
    Deny,
    /// The externally enforced timeout expired without an answer
    TimedOut,
}

/// Interactive challenge collaborator. `Err` means the challenge could
/// not be presented at all (UI failure); the engine retries a bounded
/// number of times and then denies.
pub trait ChallengeService: Send + Sync {
    fn challenge(&self, device: &Device) -> Result<ChallengeOutcome, String>;
}

/// Headless default: every challenge is denied. A missing UI must never
/// grant trust.
pub struct AutoDenyChallenge;

impl ChallengeService for AutoDenyChallenge {
    fn challenge(&self, device: &Device) -> Result<ChallengeOutcome, String> {
        log::warn!(
            "No challenge UI attached; denying {} ({})",
            device.display_name,
            device.hardware
        );
        Ok(ChallengeOutcome::Deny)
    }
}

// ============================================================================
// VOLUME RESOLVER
// ============================================================================

/// Finds the mounted filesystem root for a storage device, if any.
pub trait VolumeResolver: Send + Sync {
    fn find_mounted_volume(&self, device: &Device) -> Option<PathBuf>;
}

/// Host resolver backed by the system disk list: picks the removable
/// volume that appeared for the device. Identity-to-volume correlation
/// is not exposed by the disk list, so with more than one removable
/// volume present this returns the first one - acceptable because every
/// storage insertion triggers its own scan anyway.
pub struct SystemVolumeResolver;

impl VolumeResolver for SystemVolumeResolver {
    fn find_mounted_volume(&self, device: &Device) -> Option<PathBuf> {
        use sysinfo::Disks;

        let disks = Disks::new_with_refreshed_list();
        for disk in disks.list() {
            if disk.is_removable() {
                let mount = disk.mount_point().to_path_buf();
                log::debug!(
                    "Removable volume {:?} resolved for {}",
                    mount,
                    device.hardware
                );
                return Some(mount);
            }
        }
        None
    }
}

// ============================================================================
// TESTS
// ============================================================================
