//! Host Enforcement Backends
//!
//! OS-backed implementations of the policy and instance surfaces.
//!
//! Windows: the device-installation restriction policy store (default
//! deny + AllowDeviceIDs/DenyDeviceIDs) via `reg`, instance control via
//! `pnputil`. Both need an elevated process; the capability probe finds
//! out once at startup.
//!
//! Elsewhere: the USB authorization sysfs surface (`authorized` /
//! `authorized_default` attributes). Identity lists have no kernel
//! store there, so they live in process memory and only the per-device
//! authorization is pushed down.

#![allow(dead_code)]

use super::backend::{InstanceBackend, InstanceInfo, PolicyBackend};
use super::types::EnforcementError;

#[cfg(windows)]
use std::process::Command;

// ============================================================================
// COMMAND HELPER (Windows)
// ============================================================================

#[cfg(windows)]
fn run_command(program: &str, args: &[&str]) -> Result<String, EnforcementError> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| EnforcementError(format!("failed to run {}: {}", program, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(EnforcementError(format!(
            "{} {} failed: {}",
            program,
            args.join(" "),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

// ============================================================================
// WINDOWS POLICY BACKEND
// ============================================================================

#[cfg(windows)]
const RESTRICTIONS_KEY: &str =
    "HKLM\\SOFTWARE\\Policies\\Microsoft\\Windows\\DeviceInstall\\Restrictions";

/// Device-installation restriction policy store.
#[cfg(windows)]
pub struct HostPolicyBackend;

#[cfg(windows)]
impl HostPolicyBackend {
    pub fn new() -> Self {
        Self
    }

    fn list_key(list: &str) -> String {
        format!("{}\\{}", RESTRICTIONS_KEY, list)
    }

    /// Read the numbered REG_SZ values of an identity list key.
    fn read_list(list: &str) -> Result<Vec<(String, String)>, EnforcementError> {
        let key = Self::list_key(list);
        let output = match run_command("reg", &["query", &key]) {
            Ok(out) => out,
            // A missing key is an empty list
            Err(_) => return Ok(Vec::new()),
        };

        let mut entries = Vec::new();
        for line in output.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 3 && parts[1] == "REG_SZ" {
                entries.push((parts[0].to_string(), parts[2..].join(" ")));
            }
        }
        Ok(entries)
    }

    fn add_to_list(list: &str, identity: &str) -> Result<(), EnforcementError> {
        let entries = Self::read_list(list)?;
        if entries.iter().any(|(_, v)| v == identity) {
            return Ok(());
        }
        let next = entries
            .iter()
            .filter_map(|(name, _)| name.parse::<u32>().ok())
            .max()
            .unwrap_or(0)
            + 1;
        run_command(
            "reg",
            &[
                "add",
                &Self::list_key(list),
                "/v",
                &next.to_string(),
                "/t",
                "REG_SZ",
                "/d",
                identity,
                "/f",
            ],
        )?;
        Ok(())
    }

    fn remove_from_list(list: &str, identity: &str) -> Result<(), EnforcementError> {
        for (name, value) in Self::read_list(list)? {
            if value == identity {
                run_command(
                    "reg",
                    &["delete", &Self::list_key(list), "/v", &name, "/f"],
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(windows)]
impl PolicyBackend for HostPolicyBackend {
    fn set_default_deny(&self, enabled: bool) -> Result<(), EnforcementError> {
        run_command(
            "reg",
            &[
                "add",
                RESTRICTIONS_KEY,
                "/v",
                "DenyUnspecified",
                "/t",
                "REG_DWORD",
                "/d",
                if enabled { "1" } else { "0" },
                "/f",
            ],
        )?;
        Ok(())
    }

    fn add_to_allow_list(&self, identity: &str) -> Result<(), EnforcementError> {
        Self::add_to_list("AllowDeviceIDs", identity)
    }

    fn remove_from_allow_list(&self, identity: &str) -> Result<(), EnforcementError> {
        Self::remove_from_list("AllowDeviceIDs", identity)
    }

    fn allow_list(&self) -> Result<Vec<String>, EnforcementError> {
        Ok(Self::read_list("AllowDeviceIDs")?
            .into_iter()
            .map(|(_, v)| v)
            .collect())
    }

    fn add_to_deny_list(&self, identity: &str) -> Result<(), EnforcementError> {
        Self::add_to_list("DenyDeviceIDs", identity)
    }

    fn remove_from_deny_list(&self, identity: &str) -> Result<(), EnforcementError> {
        Self::remove_from_list("DenyDeviceIDs", identity)
    }

    fn deny_list(&self) -> Result<Vec<String>, EnforcementError> {
        Ok(Self::read_list("DenyDeviceIDs")?
            .into_iter()
            .map(|(_, v)| v)
            .collect())
    }

    fn request_reenumeration(&self) -> Result<(), EnforcementError> {
        run_command("pnputil", &["/scan-devices"])?;
        Ok(())
    }

    fn request_reenumeration_fallback(&self) -> Result<(), EnforcementError> {
        run_command("devcon", &["rescan"])?;
        Ok(())
    }
}

// ============================================================================
// WINDOWS INSTANCE BACKEND
// ============================================================================

#[cfg(windows)]
pub struct HostInstanceBackend;

#[cfg(windows)]
impl HostInstanceBackend {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(windows)]
impl InstanceBackend for HostInstanceBackend {
    fn probe(&self) -> bool {
        // Enumeration works unelevated, but enable/disable does not;
        // probing a no-op disable of a bogus id tells us nothing useful,
        // so enumerate and trust the first real failure to downgrade.
        run_command("pnputil", &["/enum-devices", "/connected"]).is_ok()
    }

    fn list_instances(&self) -> Result<Vec<InstanceInfo>, EnforcementError> {
        let output = run_command("pnputil", &["/enum-devices", "/connected"])?;
        let mut instances = Vec::new();
        let mut current_id: Option<String> = None;
        let mut current_desc = String::new();
        let mut current_disabled = false;

        for line in output.lines() {
            let line = line.trim();
            if let Some(id) = line.strip_prefix("Instance ID:") {
                if let Some(pnp_id) = current_id.take() {
                    instances.push(InstanceInfo {
                        pnp_id,
                        description: std::mem::take(&mut current_desc),
                        disabled: current_disabled,
                    });
                }
                current_id = Some(id.trim().to_uppercase());
                current_disabled = false;
            } else if let Some(desc) = line.strip_prefix("Device Description:") {
                current_desc = desc.trim().to_string();
            } else if let Some(status) = line.strip_prefix("Status:") {
                current_disabled = status.trim().eq_ignore_ascii_case("disabled");
            }
        }
        if let Some(pnp_id) = current_id {
            instances.push(InstanceInfo {
                pnp_id,
                description: current_desc,
                disabled: current_disabled,
            });
        }
        Ok(instances)
    }

    fn enable(&self, pnp_id: &str) -> Result<(), EnforcementError> {
        run_command("pnputil", &["/enable-device", pnp_id])?;
        Ok(())
    }

    fn disable(&self, pnp_id: &str) -> Result<(), EnforcementError> {
        run_command("pnputil", &["/disable-device", pnp_id])?;
        Ok(())
    }

    fn is_disabled(&self, pnp_id: &str) -> Result<bool, EnforcementError> {
        Ok(self
            .list_instances()?
            .iter()
            .any(|i| i.pnp_id == pnp_id.to_uppercase() && i.disabled))
    }
}

// ============================================================================
// SYSFS BACKENDS (non-Windows)
// ============================================================================

#[cfg(not(windows))]
mod sysfs {
    use super::*;
    use crate::logic::enforcement::backend::MemoryPolicyBackend;
    use std::path::{Path, PathBuf};

    /// Policy store for hosts without an identity-list policy surface:
    /// lists live in process memory, the default posture is pushed to
    /// `authorized_default` on every USB host controller.
    pub struct HostPolicyBackend {
        lists: MemoryPolicyBackend,
        usb_devices_path: PathBuf,
    }

    impl HostPolicyBackend {
        pub fn new() -> Self {
            Self::with_root_path(PathBuf::from("/"))
        }

        /// Root injection keeps this testable against a fake sysfs tree.
        pub fn with_root_path(root: PathBuf) -> Self {
            Self {
                lists: MemoryPolicyBackend::new(),
                usb_devices_path: root.join("sys/bus/usb/devices"),
            }
        }

        fn host_controllers(&self) -> Vec<PathBuf> {
            let mut out = Vec::new();
            let Ok(entries) = std::fs::read_dir(&self.usb_devices_path) else {
                return out;
            };
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                // usb1, usb2, ... are the root hubs carrying
                // authorized_default
                if name.starts_with("usb") && name[3..].chars().all(|c| c.is_ascii_digit()) {
                    out.push(entry.path());
                }
            }
            out
        }
    }

    impl PolicyBackend for HostPolicyBackend {
        fn set_default_deny(&self, enabled: bool) -> Result<(), EnforcementError> {
            self.lists.set_default_deny(enabled)?;
            let val = if enabled { "0" } else { "1" };
            let mut failures = 0;
            for hub in self.host_controllers() {
                let path = hub.join("authorized_default");
                if let Err(e) = std::fs::write(&path, val) {
                    log::warn!("Couldn't write {} to {:?}: {}", val, path, e);
                    failures += 1;
                }
            }
            if failures > 0 {
                log::warn!(
                    "authorized_default not applied on {} controller(s); in-process posture still active",
                    failures
                );
            }
            Ok(())
        }

        fn add_to_allow_list(&self, identity: &str) -> Result<(), EnforcementError> {
            self.lists.add_to_allow_list(identity)
        }

        fn remove_from_allow_list(&self, identity: &str) -> Result<(), EnforcementError> {
            self.lists.remove_from_allow_list(identity)
        }

        fn allow_list(&self) -> Result<Vec<String>, EnforcementError> {
            self.lists.allow_list()
        }

        fn add_to_deny_list(&self, identity: &str) -> Result<(), EnforcementError> {
            self.lists.add_to_deny_list(identity)
        }

        fn remove_from_deny_list(&self, identity: &str) -> Result<(), EnforcementError> {
            self.lists.remove_from_deny_list(identity)
        }

        fn deny_list(&self) -> Result<Vec<String>, EnforcementError> {
            self.lists.deny_list()
        }

        fn request_reenumeration(&self) -> Result<(), EnforcementError> {
            // The authorized writes take effect immediately; nothing to
            // re-trigger here.
            Ok(())
        }

        fn request_reenumeration_fallback(&self) -> Result<(), EnforcementError> {
            Ok(())
        }
    }

    /// Per-device control via the `authorized` attribute.
    pub struct HostInstanceBackend {
        usb_devices_path: PathBuf,
    }

    impl HostInstanceBackend {
        pub fn new() -> Self {
            Self::with_root_path(PathBuf::from("/"))
        }

        pub fn with_root_path(root: PathBuf) -> Self {
            Self {
                usb_devices_path: root.join("sys/bus/usb/devices"),
            }
        }

        fn read_attr(dir: &Path, name: &str) -> Option<String> {
            std::fs::read_to_string(dir.join(name))
                .ok()
                .map(|s| s.trim().to_string())
        }

        /// Vendor/product/serial attributes, normalized for id matching.
        fn read_id_attr(dir: &Path, name: &str) -> Option<String> {
            Self::read_attr(dir, name).map(|s| s.to_uppercase())
        }

        /// Find the sysfs directory whose idVendor/idProduct/serial match
        /// a raw PnP id.
        fn find_device_dir(&self, pnp_id: &str) -> Result<PathBuf, EnforcementError> {
            let parsed = crate::logic::identity::parse_raw_id(pnp_id)
                .ok_or_else(|| EnforcementError(format!("unparseable id: {}", pnp_id)))?;

            let entries = std::fs::read_dir(&self.usb_devices_path)
                .map_err(|e| EnforcementError(format!("read sysfs: {}", e)))?;

            for entry in entries.flatten() {
                let dir = entry.path();
                let vendor = Self::read_id_attr(&dir, "idVendor");
                let product = Self::read_id_attr(&dir, "idProduct");
                if vendor.as_deref() != Some(parsed.hardware.vendor_id.as_str())
                    || product.as_deref() != Some(parsed.hardware.product_id.as_str())
                {
                    continue;
                }
                if let Some(serial) = &parsed.serial {
                    if Self::read_id_attr(&dir, "serial").as_deref() != Some(serial.as_str()) {
                        continue;
                    }
                }
                return Ok(dir);
            }
            Err(EnforcementError(format!("no sysfs device for {}", pnp_id)))
        }

        fn set_authorized(&self, pnp_id: &str, enable: bool) -> Result<(), EnforcementError> {
            let dir = self.find_device_dir(pnp_id)?;
            let path = dir.join("authorized");
            let val = if enable { "1" } else { "0" };
            log::info!(
                "{} {:?}",
                if enable { "Authorizing" } else { "Deauthorizing" },
                dir
            );
            std::fs::write(&path, val)
                .map_err(|e| EnforcementError(format!("write {:?}: {}", path, e)))
        }
    }

    impl InstanceBackend for HostInstanceBackend {
        fn probe(&self) -> bool {
            self.usb_devices_path.is_dir()
        }

        fn list_instances(&self) -> Result<Vec<InstanceInfo>, EnforcementError> {
            let entries = std::fs::read_dir(&self.usb_devices_path)
                .map_err(|e| EnforcementError(format!("read sysfs: {}", e)))?;

            let mut out = Vec::new();
            for entry in entries.flatten() {
                let dir = entry.path();
                let (Some(vendor), Some(product)) = (
                    Self::read_id_attr(&dir, "idVendor"),
                    Self::read_id_attr(&dir, "idProduct"),
                ) else {
                    continue;
                };
                let serial = Self::read_id_attr(&dir, "serial");
                let pnp_id = match serial {
                    Some(s) => format!("USB\\VID_{}&PID_{}\\{}", vendor, product, s),
                    None => format!("USB\\VID_{}&PID_{}", vendor, product),
                };
                let disabled = Self::read_attr(&dir, "authorized").as_deref() == Some("0");
                out.push(InstanceInfo {
                    pnp_id,
                    description: Self::read_attr(&dir, "product").unwrap_or_default(),
                    disabled,
                });
            }
            Ok(out)
        }

        fn enable(&self, pnp_id: &str) -> Result<(), EnforcementError> {
            self.set_authorized(pnp_id, true)
        }

        fn disable(&self, pnp_id: &str) -> Result<(), EnforcementError> {
            self.set_authorized(pnp_id, false)
        }

        fn is_disabled(&self, pnp_id: &str) -> Result<bool, EnforcementError> {
            let dir = self.find_device_dir(pnp_id)?;
            Ok(Self::read_attr(&dir, "authorized").as_deref() == Some("0"))
        }
    }
}

#[cfg(not(windows))]
pub use sysfs::{HostInstanceBackend, HostPolicyBackend};

// ============================================================================
// TESTS
// ============================================================================

#[cfg(all(test, not(windows)))]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    /// Build a fake sysfs tree with one root hub and one device.
    fn fake_sysfs(root: &Path) {
        let devices = root.join("sys/bus/usb/devices");
        let hub = devices.join("usb1");
        fs::create_dir_all(&hub).unwrap();
        fs::write(hub.join("authorized_default"), "1").unwrap();

        let dev = devices.join("1-2");
        fs::create_dir_all(&dev).unwrap();
        fs::write(dev.join("idVendor"), "0781\n").unwrap();
        fs::write(dev.join("idProduct"), "5567\n").unwrap();
        fs::write(dev.join("serial"), "SER9\n").unwrap();
        fs::write(dev.join("product"), "Cruzer Blade\n").unwrap();
        fs::write(dev.join("authorized"), "1").unwrap();
    }

    #[test]
    fn test_default_deny_writes_authorized_default() {
        let tmp = tempfile::tempdir().unwrap();
        fake_sysfs(tmp.path());

        let backend = HostPolicyBackend::with_root_path(tmp.path().to_path_buf());
        backend.set_default_deny(true).unwrap();

        let content =
            fs::read_to_string(tmp.path().join("sys/bus/usb/devices/usb1/authorized_default"))
                .unwrap();
        assert_eq!(content, "0");
    }

    #[test]
    fn test_instance_disable_writes_authorized() {
        let tmp = tempfile::tempdir().unwrap();
        fake_sysfs(tmp.path());

        let backend = HostInstanceBackend::with_root_path(tmp.path().to_path_buf());
        assert!(backend.probe());

        backend.disable("USB\\VID_0781&PID_5567\\SER9").unwrap();
        let content =
            fs::read_to_string(tmp.path().join("sys/bus/usb/devices/1-2/authorized")).unwrap();
        assert_eq!(content, "0");
        assert!(backend.is_disabled("USB\\VID_0781&PID_5567\\SER9").unwrap());

        backend.enable("USB\\VID_0781&PID_5567\\SER9").unwrap();
        assert!(!backend.is_disabled("USB\\VID_0781&PID_5567\\SER9").unwrap());
    }

    #[test]
    fn test_list_instances_builds_pnp_ids() {
        let tmp = tempfile::tempdir().unwrap();
        fake_sysfs(tmp.path());

        let backend = HostInstanceBackend::with_root_path(tmp.path().to_path_buf());
        let instances = backend.list_instances().unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].pnp_id, "USB\\VID_0781&PID_5567\\SER9");
        assert_eq!(instances[0].description, "Cruzer Blade");
        assert!(!instances[0].disabled);
    }

    #[test]
    fn test_unknown_device_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        fake_sysfs(tmp.path());

        let backend = HostInstanceBackend::with_root_path(tmp.path().to_path_buf());
        assert!(backend.disable("USB\\VID_FFFF&PID_0000\\NONE").is_err());
    }
}
