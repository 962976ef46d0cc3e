//! Enforcement Types
//!
//! KHÔNG chứa logic - chỉ data structures.

#![allow(dead_code)]

use serde::Serialize;

// ============================================================================
// ERROR
// ============================================================================

#[derive(Debug)]
pub struct EnforcementError(pub String);

impl std::fmt::Display for EnforcementError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EnforcementError: {}", self.0)
    }
}

impl std::error::Error for EnforcementError {}

// ============================================================================
// STRATEGY RESULTS
// ============================================================================

/// Which enforcement strategy produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StrategyKind {
    PolicyList,
    Instance,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::PolicyList => "policy_list",
            StrategyKind::Instance => "instance",
        }
    }
}

/// Outcome of one strategy's attempt at one action.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyResult {
    pub strategy: StrategyKind,
    pub success: bool,
    pub detail: String,
}

impl StrategyResult {
    pub fn ok(strategy: StrategyKind, detail: impl Into<String>) -> Self {
        Self {
            strategy,
            success: true,
            detail: detail.into(),
        }
    }

    pub fn failed(strategy: StrategyKind, detail: impl Into<String>) -> Self {
        Self {
            strategy,
            success: false,
            detail: detail.into(),
        }
    }

    pub fn skipped(strategy: StrategyKind, detail: impl Into<String>) -> Self {
        Self {
            strategy,
            success: false,
            detail: detail.into(),
        }
    }
}

/// Synchronous outcome of one enforcement call across all attempted
/// strategies. Never silently swallowed: the caller always gets the
/// per-strategy breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct EnforcementOutcome {
    pub action: String,
    pub results: Vec<StrategyResult>,
}

impl EnforcementOutcome {
    pub fn new(action: String) -> Self {
        Self {
            action,
            results: Vec::new(),
        }
    }

    pub fn push(&mut self, result: StrategyResult) {
        self.results.push(result);
    }

    /// The call succeeds if either strategy succeeded.
    pub fn succeeded(&self) -> bool {
        self.results.iter().any(|r| r.success)
    }

    /// Log each strategy's result at the appropriate level.
    pub fn log(&self) {
        for r in &self.results {
            if r.success {
                log::info!("[enforce] {} via {}: {}", self.action, r.strategy.as_str(), r.detail);
            } else {
                log::warn!("[enforce] {} via {} failed: {}", self.action, r.strategy.as_str(), r.detail);
            }
        }
        if !self.succeeded() {
            log::error!("[enforce] {} failed on every strategy", self.action);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
