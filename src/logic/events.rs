//! Engine Event Channel
//!
//! Lifecycle events đi qua một bounded channel duy nhất - không multicast,
//! không callback. Consumer (logging, UI refresh, rule persistence) nhận
//! từ receiver; ordering và delivery guarantees là explicit.
//!
//! Delivery: events are dropped (counted and warned) when the consumer
//! lags behind the channel capacity; the engine never blocks on a slow
//! consumer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::device::{Device, DeviceStatus};
use super::scanner::ThreatRecord;

// ============================================================================
// EVENT TYPES
// ============================================================================

/// How an authorization verdict was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuthMethod {
    /// Enabled allow-rule matched
    AllowRule,
    /// Enabled deny-rule matched
    DenyRule,
    /// Valid cached authentication (Keyboard/Mouse only)
    CachedAuthentication,
    /// Interactive challenge verdict
    Challenge,
    /// Storage scan verdict
    Scan,
    /// Re-enumeration inside the scanned-clean grace window
    ScanGrace,
    /// Pipeline fault, fail-closed default applied
    Failure,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::AllowRule => "allow_rule",
            AuthMethod::DenyRule => "deny_rule",
            AuthMethod::CachedAuthentication => "cached_authentication",
            AuthMethod::Challenge => "challenge",
            AuthMethod::Scan => "scan",
            AuthMethod::ScanGrace => "scan_grace",
            AuthMethod::Failure => "failure",
        }
    }
}

/// What happened.
#[derive(Debug, Clone, Serialize)]
pub enum EngineEventKind {
    /// A new applicable device was observed on the bus
    DeviceObserved { device: Device },
    /// The engine reached a terminal verdict for a device
    AuthorizationDecided {
        device: Device,
        verdict: DeviceStatus,
        method: AuthMethod,
        reason: String,
    },
    /// The scanner flagged a file on a storage device
    ThreatFound { raw_id: String, record: ThreatRecord },
    /// The device left the bus and its record was discarded
    DeviceRemoved { raw_id: String },
    /// The instance enforcement strategy is unavailable; running
    /// policy-list-only
    EnforcementDegraded { reason: String },
}

/// One emitted event.
#[derive(Debug, Clone, Serialize)]
pub struct EngineEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: EngineEventKind,
}

impl EngineEvent {
    pub fn new(kind: EngineEventKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
        }
    }
}

// ============================================================================
// EVENT BUS
// ============================================================================

/// Sending half of the engine's event channel.
///
/// Owned explicitly and passed by handle into the engine - no process-wide
/// static. Cloning shares the same underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::Sender<EngineEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventBus {
    /// Create the bus and its single consumer receiver.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Emit an event. Never blocks: if the consumer has fallen behind the
    /// channel capacity the event is dropped, counted, and warned.
    pub fn emit(&self, kind: EngineEventKind) {
        let event = EngineEvent::new(kind);
        if let Err(e) = self.tx.try_send(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            log::warn!("Event channel full or closed, event dropped: {}", e);
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ============================================================================
// TESTS
// ============================================================================
