//! Scanner Types
//!
//! KHÔNG chứa logic - chỉ data structures.

#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::logic::config::VerdictThresholds;

// ============================================================================
// THREAT TIER
// ============================================================================

/// Severity tier of one flagged file. Ordering is by severity, so
/// highest-tier-wins can use `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ThreatTier {
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatTier::Low => "LOW",
            ThreatTier::Medium => "MEDIUM",
            ThreatTier::High => "HIGH",
            ThreatTier::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for ThreatTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// THREAT RECORD
// ============================================================================

/// One flagged file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatRecord {
    pub path: PathBuf,
    pub tier: ThreatTier,
    /// First detection reason discovered; the tier is the most severe of
    /// all matching layers.
    pub reason: String,
    pub size: u64,
    /// SHA-256 of the content, when the file was small enough to read
    pub sha256: Option<String>,
}

// ============================================================================
// SCAN RESULT
// ============================================================================

/// Aggregate of one scan invocation. Immutable after return and never
/// merged with a prior result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub scan_id: String,
    pub files_scanned: usize,
    pub bytes_scanned: u64,
    pub duration_ms: u64,
    pub threats: Vec<ThreatRecord>,
    /// False when the wall-clock budget expired before the walk finished;
    /// the partial result still decides (fail-closed).
    pub completed: bool,
    pub error: Option<String>,
}

impl ScanResult {
    pub fn tier_count(&self, tier: ThreatTier) -> usize {
        self.threats.iter().filter(|t| t.tier == tier).count()
    }

    /// Apply the caller's aggregation thresholds: does this result count
    /// as "threats detected"?
    pub fn exceeds(&self, thresholds: &VerdictThresholds) -> bool {
        if thresholds.block_on_critical && self.tier_count(ThreatTier::Critical) > 0 {
            return true;
        }
        if self.tier_count(ThreatTier::High) >= thresholds.high_count {
            return true;
        }
        if self.tier_count(ThreatTier::Medium) >= thresholds.medium_count {
            return true;
        }
        false
    }
}

// ============================================================================
// TESTS
// ============================================================================
