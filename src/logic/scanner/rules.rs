//! Scanner Detection Tables
//!
//! Static heuristic tables for the four classification layers. These are
//! curated from well-known removable-media malware behavior; they are not
//! a signature database.

use once_cell::sync::Lazy;
use regex::Regex;

use super::types::ThreatTier;

// ============================================================================
// LAYER 1: EXACT FILENAME BLOCKLIST
// ============================================================================

/// Filenames that have no legitimate reason to exist on removable media.
/// Compared case-insensitively against the file name only.
pub const EXACT_NAME_BLOCKLIST: &[(&str, ThreatTier)] = &[
    // Autorun-era USB worms
    ("autorun.inf", ThreatTier::Critical),
    ("ravmon.exe", ThreatTier::Critical),
    ("ntdelect.com", ThreatTier::Critical),
    ("kavo.exe", ThreatTier::Critical),
    ("amvo.exe", ThreatTier::Critical),
    ("fun.xls.exe", ThreatTier::Critical),
    ("new folder.exe", ThreatTier::Critical),
    ("copy of shortcut to (1).lnk", ThreatTier::Critical),
    // Common droppers masquerading as system files
    ("svchost.exe", ThreatTier::High),
    ("lsass.exe", ThreatTier::High),
    ("csrss.exe", ThreatTier::High),
    ("winlogon.exe", ThreatTier::High),
];

// ============================================================================
// LAYER 2: FILENAME PATTERN BLOCKLIST
// ============================================================================

/// One compiled pattern with its tier and reason.
pub struct NamePattern {
    pub regex: Regex,
    pub tier: ThreatTier,
    pub reason: &'static str,
}

/// Case-insensitive patterns over the file name.
pub static NAME_PATTERNS: Lazy<Vec<NamePattern>> = Lazy::new(|| {
    vec![
        NamePattern {
            regex: Regex::new(
                r"(?i)\.(jpe?g|png|gif|bmp|doc|docx|pdf|txt|xls|xlsx|ppt|pptx|mp3|mp4|avi)\.(exe|scr|com|pif|bat|cmd|vbs|js)$",
            )
            .unwrap(),
            tier: ThreatTier::Critical,
            reason: "document or media extension hiding an executable one",
        },
        NamePattern {
            regex: Regex::new(r"(?i)(crack|keygen|key_gen|patch(er)?|loader|activat(or|ion))")
                .unwrap(),
            tier: ThreatTier::High,
            reason: "crack/keygen naming",
        },
        NamePattern {
            regex: Regex::new(r"(?i)(trojan|keylog|stealer|backdoor|botnet|ransom|inject(or)?|rootkit|payload)")
                .unwrap(),
            tier: ThreatTier::High,
            reason: "malware terminology in name",
        },
        NamePattern {
            regex: Regex::new(r"(?i)^[a-f0-9]{16,}\.(exe|scr|com|dll)$").unwrap(),
            tier: ThreatTier::Medium,
            reason: "hex-obfuscated executable name",
        },
        NamePattern {
            regex: Regex::new(r" {5,}\.").unwrap(),
            tier: ThreatTier::Medium,
            reason: "extension pushed out of view with whitespace padding",
        },
    ]
});

// ============================================================================
// LAYER 3: EXTENSION RISK TABLE
// ============================================================================

/// Broad risk category of a file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtCategory {
    Executable,
    Script,
    Macro,
    Archive,
    Shortcut,
    WebScript,
}

impl ExtCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtCategory::Executable => "executable",
            ExtCategory::Script => "script",
            ExtCategory::Macro => "macro-enabled document",
            ExtCategory::Archive => "archive",
            ExtCategory::Shortcut => "shortcut",
            ExtCategory::WebScript => "web script",
        }
    }

    /// Categories whose content is inherently runnable; these always get
    /// the header check even when no earlier layer flagged them.
    pub fn inherently_runnable(&self) -> bool {
        matches!(self, ExtCategory::Executable | ExtCategory::Script)
    }
}

/// Baseline tier per extension (lowercase, no dot).
pub const EXTENSION_RISK: &[(&str, ExtCategory, ThreatTier)] = &[
    // Executables
    ("exe", ExtCategory::Executable, ThreatTier::Medium),
    ("scr", ExtCategory::Executable, ThreatTier::High),
    ("com", ExtCategory::Executable, ThreatTier::High),
    ("pif", ExtCategory::Executable, ThreatTier::High),
    ("msi", ExtCategory::Executable, ThreatTier::Medium),
    ("dll", ExtCategory::Executable, ThreatTier::Medium),
    ("sys", ExtCategory::Executable, ThreatTier::Medium),
    ("cpl", ExtCategory::Executable, ThreatTier::High),
    // Scripts
    ("bat", ExtCategory::Script, ThreatTier::Medium),
    ("cmd", ExtCategory::Script, ThreatTier::Medium),
    ("vbs", ExtCategory::Script, ThreatTier::High),
    ("vbe", ExtCategory::Script, ThreatTier::High),
    ("js", ExtCategory::Script, ThreatTier::Medium),
    ("jse", ExtCategory::Script, ThreatTier::High),
    ("ps1", ExtCategory::Script, ThreatTier::Medium),
    ("wsf", ExtCategory::Script, ThreatTier::High),
    ("sh", ExtCategory::Script, ThreatTier::Medium),
    ("jar", ExtCategory::Executable, ThreatTier::Medium),
    // Macro-enabled documents
    ("docm", ExtCategory::Macro, ThreatTier::High),
    ("xlsm", ExtCategory::Macro, ThreatTier::High),
    ("pptm", ExtCategory::Macro, ThreatTier::High),
    ("dotm", ExtCategory::Macro, ThreatTier::High),
    // Archives (not recursed into)
    ("zip", ExtCategory::Archive, ThreatTier::Low),
    ("rar", ExtCategory::Archive, ThreatTier::Low),
    ("7z", ExtCategory::Archive, ThreatTier::Low),
    ("cab", ExtCategory::Archive, ThreatTier::Low),
    ("iso", ExtCategory::Archive, ThreatTier::Medium),
    ("img", ExtCategory::Archive, ThreatTier::Medium),
    // Shortcuts (LNK-based USB worms)
    ("lnk", ExtCategory::Shortcut, ThreatTier::High),
    ("url", ExtCategory::Shortcut, ThreatTier::Medium),
    // Web scripts
    ("hta", ExtCategory::WebScript, ThreatTier::High),
    ("html", ExtCategory::WebScript, ThreatTier::Low),
    ("htm", ExtCategory::WebScript, ThreatTier::Low),
];

/// Look up the risk entry for a file extension.
pub fn extension_risk(ext: &str) -> Option<(ExtCategory, ThreatTier)> {
    let ext = ext.to_lowercase();
    EXTENSION_RISK
        .iter()
        .find(|(e, _, _)| *e == ext)
        .map(|(_, cat, tier)| (*cat, *tier))
}

// ============================================================================
// DISCOVERY SKIP LIST
// ============================================================================

/// OS metadata folders the walk never descends into.
pub const SKIP_FOLDERS: &[&str] = &[
    "system volume information",
    "$recycle.bin",
    "recycler",
    ".trashes",
    ".trash-1000",
    ".spotlight-v100",
    ".fseventsd",
    "__macosx",
    "lost+found",
];

pub fn is_skip_folder(name: &str) -> bool {
    let name = name.to_lowercase();
    SKIP_FOLDERS.iter().any(|s| *s == name)
}

// ============================================================================
// TESTS
// ============================================================================
