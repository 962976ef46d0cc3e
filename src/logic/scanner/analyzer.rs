//! Per-File Classification
//!
//! Runs one file through the four ordered layers: exact-name blocklist,
//! name-pattern blocklist, extension-risk table, and a header check for
//! files that are already flagged or inherently runnable. The most severe
//! tier wins; the first discovered reason is kept.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::rules::{extension_risk, ExtCategory, EXACT_NAME_BLOCKLIST, NAME_PATTERNS};
use super::types::{ThreatRecord, ThreatTier};

// ============================================================================
// HEADER MAGIC
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderKind {
    Pe,
    Elf,
    JavaClass,
    Shebang,
}

impl HeaderKind {
    fn as_str(&self) -> &'static str {
        match self {
            HeaderKind::Pe => "PE executable",
            HeaderKind::Elf => "ELF executable",
            HeaderKind::JavaClass => "Java class",
            HeaderKind::Shebang => "shell script",
        }
    }
}

fn sniff_header(bytes: &[u8]) -> Option<HeaderKind> {
    if bytes.len() >= 2 && &bytes[..2] == b"MZ" {
        return Some(HeaderKind::Pe);
    }
    if bytes.len() >= 4 && &bytes[..4] == b"\x7fELF" {
        return Some(HeaderKind::Elf);
    }
    if bytes.len() >= 4 && bytes[..4] == [0xCA, 0xFE, 0xBA, 0xBE] {
        return Some(HeaderKind::JavaClass);
    }
    if bytes.len() >= 2 && &bytes[..2] == b"#!" {
        return Some(HeaderKind::Shebang);
    }
    None
}

// ============================================================================
// ANALYSIS
// ============================================================================

/// Classify one file. Returns `None` when no layer matched.
///
/// Files above `large_cap` get metadata-only checks: the header and
/// digest layers are skipped.
pub fn analyze_file(path: &Path, size: u64, large_cap: u64) -> Option<ThreatRecord> {
    let file_name = path.file_name()?.to_string_lossy().to_lowercase();
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let mut tier: Option<ThreatTier> = None;
    let mut reason: Option<String> = None;

    let record_match = |t: ThreatTier, r: String, tier: &mut Option<ThreatTier>, reason: &mut Option<String>| {
        if tier.map(|cur| t > cur).unwrap_or(true) {
            *tier = Some(t);
        }
        if reason.is_none() {
            *reason = Some(r);
        }
    };

    // Layer 1: exact filename blocklist
    if let Some((_, t)) = EXACT_NAME_BLOCKLIST
        .iter()
        .find(|(name, _)| *name == file_name)
    {
        record_match(
            *t,
            format!("known hostile filename '{}'", file_name),
            &mut tier,
            &mut reason,
        );
    }

    // Layer 2: filename pattern blocklist
    for pattern in NAME_PATTERNS.iter() {
        if pattern.regex.is_match(&file_name) {
            record_match(pattern.tier, pattern.reason.to_string(), &mut tier, &mut reason);
        }
    }

    // Layer 3: extension risk table
    let category = match extension_risk(&extension) {
        Some((cat, t)) => {
            record_match(
                t,
                format!("{} extension '.{}'", cat.as_str(), extension),
                &mut tier,
                &mut reason,
            );
            Some(cat)
        }
        None => None,
    };

    // Layer 4: header check, only for already-flagged or inherently
    // runnable files, and only under the large-file cap
    let wants_header = tier.is_some() || category.map(|c| c.inherently_runnable()).unwrap_or(false);
    if wants_header && size <= large_cap {
        if let Some(kind) = read_header(path) {
            let runnable_ext = category.map(|c| c.inherently_runnable()).unwrap_or(false);
            match kind {
                HeaderKind::Pe | HeaderKind::Elf | HeaderKind::JavaClass if !runnable_ext => {
                    record_match(
                        ThreatTier::Critical,
                        format!("{} content behind a non-executable name", kind.as_str()),
                        &mut tier,
                        &mut reason,
                    );
                }
                HeaderKind::Shebang if category != Some(ExtCategory::Script) => {
                    record_match(
                        ThreatTier::High,
                        "shell script content behind a non-script name".to_string(),
                        &mut tier,
                        &mut reason,
                    );
                }
                _ => {}
            }
        }
    }

    let tier = tier?;
    let sha256 = if size <= large_cap {
        digest_file(path)
    } else {
        None
    };

    Some(ThreatRecord {
        path: path.to_path_buf(),
        tier,
        reason: reason.unwrap_or_else(|| "flagged".to_string()),
        size,
        sha256,
    })
}

fn read_header(path: &Path) -> Option<HeaderKind> {
    let mut file = File::open(path).ok()?;
    let mut buf = [0u8; 8];
    let n = file.read(&mut buf).ok()?;
    sniff_header(&buf[..n])
}

fn digest_file(path: &Path) -> Option<String> {
    let mut file = File::open(path).ok()?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).ok()?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Some(hex::encode(hasher.finalize()))
}

// ============================================================================
// TESTS
// ============================================================================
