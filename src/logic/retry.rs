//! Bounded Retry
//!
//! Attempt an operation a fixed number of times with a fixed backoff,
//! then give up so the caller applies its deterministic fallback. Used
//! identically for challenge display and for re-enumeration: a UI or OS
//! failure must never silently grant trust.

use std::time::Duration;

/// Fixed attempt/backoff policy.
#[derive(Debug, Clone, Copy)]
pub struct BoundedRetry {
    attempts: u32,
    backoff: Duration,
}

impl BoundedRetry {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Run `op` until it returns `Ok` or the attempt budget is spent.
    ///
    /// Blocking (sleeps between attempts); callers run it under
    /// `spawn_blocking`. Returns `None` after exhaustion - the caller
    /// decides the terminal fallback, this helper never invents one.
    pub fn run<T, E, F>(&self, label: &str, mut op: F) -> Option<T>
    where
        E: std::fmt::Display,
        F: FnMut() -> Result<T, E>,
    {
        for attempt in 1..=self.attempts {
            match op() {
                Ok(value) => return Some(value),
                Err(e) => {
                    log::warn!(
                        "{}: attempt {}/{} failed: {}",
                        label,
                        attempt,
                        self.attempts,
                        e
                    );
                    if attempt < self.attempts {
                        std::thread::sleep(self.backoff);
                    }
                }
            }
        }
        log::error!("{}: all {} attempts failed", label, self.attempts);
        None
    }
}

// ============================================================================
// TESTS
// ============================================================================
