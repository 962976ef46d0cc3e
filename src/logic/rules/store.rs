//! Rule Store
//!
//! The two persisted lists (whitelist, blacklist), each backed by one
//! file with one writer lock. Loaded at startup, appended on every
//! addition; an unparseable line is skipped with a warning, never fatal
//! to the rest of the store. Readers match against a snapshot and never
//! block behind a pending write.

#![allow(dead_code)]

use parking_lot::RwLock;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::types::{Rule, RuleList};
use crate::logic::device::Device;

// ============================================================================
// ERROR
// ============================================================================

#[derive(Debug)]
pub struct RuleStoreError(pub String);

impl std::fmt::Display for RuleStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RuleStoreError: {}", self.0)
    }
}

impl std::error::Error for RuleStoreError {}

// ============================================================================
// RULE FILE
// ============================================================================

/// One persisted rule list.
pub struct RuleFile {
    path: PathBuf,
    list: RuleList,
    rules: RwLock<Vec<Rule>>,
}

impl RuleFile {
    /// Load a rule file. A missing file is an empty list, not an error.
    pub fn load(path: PathBuf, list: RuleList) -> Self {
        let rules = match std::fs::read_to_string(&path) {
            Ok(text) => Self::parse_content(&text, &path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                log::error!("Failed to read rule file {:?}: {}", path, e);
                Vec::new()
            }
        };

        log::info!("Loaded {} {} rules from {:?}", rules.len(), list.as_str(), path);
        Self {
            path,
            list,
            rules: RwLock::new(rules),
        }
    }

    fn parse_content(text: &str, path: &Path) -> Vec<Rule> {
        let mut rules = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match Rule::parse_line(line) {
                Ok(rule) => rules.push(rule),
                Err(e) => {
                    log::warn!("Skipping bad rule at {:?}:{}: {}", path, lineno + 1, e);
                }
            }
        }
        rules
    }

    /// Append a rule to memory and to the file. The in-memory list is
    /// updated even when the file write fails - enforcement correctness
    /// now beats durability, and the failure is reported.
    pub fn append(&self, rule: Rule) -> Result<(), RuleStoreError> {
        let line = rule.to_line();
        self.rules.write().push(rule);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RuleStoreError(format!("create {:?}: {}", parent, e)))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| RuleStoreError(format!("open {:?}: {}", self.path, e)))?;
        writeln!(file, "{}", line)
            .map_err(|e| RuleStoreError(format!("write {:?}: {}", self.path, e)))?;
        Ok(())
    }

    /// Re-read the file, replacing the in-memory list. Used by the
    /// external-edit watcher.
    pub fn reload(&self) {
        let rules = match std::fs::read_to_string(&self.path) {
            Ok(text) => Self::parse_content(&text, &self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                log::error!("Reload of {:?} failed, keeping current rules: {}", self.path, e);
                return;
            }
        };
        log::info!("Reloaded {} {} rules from {:?}", rules.len(), self.list.as_str(), self.path);
        *self.rules.write() = rules;
    }

    pub fn snapshot(&self) -> Vec<Rule> {
        self.rules.read().clone()
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn matches(&self, device: &Device) -> bool {
        self.rules
            .read()
            .iter()
            .any(|r| r.matches(&device.hardware, device.serial.as_deref(), device.class))
    }
}

// ============================================================================
// RULE STORE
// ============================================================================

/// Whitelist + blacklist, independent files and locks.
pub struct RuleStore {
    whitelist: RuleFile,
    blacklist: RuleFile,
}

impl RuleStore {
    /// Load both lists from a directory (`whitelist.rules`,
    /// `blacklist.rules`).
    pub fn load(dir: &Path) -> Self {
        Self {
            whitelist: RuleFile::load(dir.join("whitelist.rules"), RuleList::Allow),
            blacklist: RuleFile::load(dir.join("blacklist.rules"), RuleList::Deny),
        }
    }

    pub fn is_allowed(&self, device: &Device) -> bool {
        self.whitelist.matches(device)
    }

    pub fn is_denied(&self, device: &Device) -> bool {
        self.blacklist.matches(device)
    }

    pub fn add_allow(&self, device: &Device, reason: &str, created_by: &str) -> Result<(), RuleStoreError> {
        let rule = Rule::for_identity(&device.hardware, &device.display_name, reason, created_by);
        log::info!("Adding allow rule for {}: {}", device.hardware, reason);
        self.whitelist.append(rule)
    }

    pub fn add_deny(&self, device: &Device, reason: &str, created_by: &str) -> Result<(), RuleStoreError> {
        let rule = Rule::for_identity(&device.hardware, &device.display_name, reason, created_by);
        log::info!("Adding deny rule for {}: {}", device.hardware, reason);
        self.blacklist.append(rule)
    }

    /// Append a pre-built rule (serial- or class-narrowed) to a list.
    pub fn add_rule(&self, list: RuleList, rule: Rule) -> Result<(), RuleStoreError> {
        match list {
            RuleList::Allow => self.whitelist.append(rule),
            RuleList::Deny => self.blacklist.append(rule),
        }
    }

    pub fn whitelist(&self) -> &RuleFile {
        &self.whitelist
    }

    pub fn blacklist(&self) -> &RuleFile {
        &self.blacklist
    }
}

// ============================================================================
// TESTS
// ============================================================================
