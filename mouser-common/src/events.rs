//! Notification events for the presentation layer
//!
//! The engine never calls into the UI. It pushes [`CohortEvent`]s into a
//! [`NotificationSink`]; the stock sink is [`NotificationQueue`], a bounded
//! queue the presentation layer drains on its own schedule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

/// Listener lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListenerState {
    Idle,
    Listening,
}

/// Coarse category used by consumers that only route on kind (sounds, banners)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    Success,
    Duplicate,
    Capacity,
    DeviceUnavailable,
    StoreFailure,
    Lifecycle,
}

/// Mouser engine events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CohortEvent {
    /// A scanned identifier became a new subject
    SubjectIngested {
        subject_id: i64,
        group_id: i64,
        rfid: String,
        timestamp: DateTime<Utc>,
    },

    /// Scanned identifier already belongs to an active subject
    DuplicateIdentifier {
        rfid: String,
        timestamp: DateTime<Utc>,
    },

    /// No group had room for a scanned subject
    CapacityExceeded {
        rfid: String,
        timestamp: DateTime<Utc>,
    },

    /// The scan device could not be opened
    DeviceUnavailable {
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Commit of a scanned subject failed after retry; the scan was dropped
    StoreWriteFailed {
        rfid: String,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Listener entered or left `Listening`
    ListenerStateChanged {
        old_state: ListenerState,
        new_state: ListenerState,
        timestamp: DateTime<Utc>,
    },

    /// Every expected subject has an identifier
    IngestionComplete {
        total: i64,
        timestamp: DateTime<Utc>,
    },
}

impl CohortEvent {
    pub fn kind(&self) -> NotificationKind {
        match self {
            CohortEvent::SubjectIngested { .. } => NotificationKind::Success,
            CohortEvent::DuplicateIdentifier { .. } => NotificationKind::Duplicate,
            CohortEvent::CapacityExceeded { .. } => NotificationKind::Capacity,
            CohortEvent::DeviceUnavailable { .. } => NotificationKind::DeviceUnavailable,
            CohortEvent::StoreWriteFailed { .. } => NotificationKind::StoreFailure,
            CohortEvent::ListenerStateChanged { .. } | CohortEvent::IngestionComplete { .. } => {
                NotificationKind::Lifecycle
            }
        }
    }

    /// Human-readable one-liner
    pub fn message(&self) -> String {
        match self {
            CohortEvent::SubjectIngested {
                subject_id,
                group_id,
                rfid,
                ..
            } => format!("RFID {} mapped to animal {} in group {}", rfid, subject_id, group_id),
            CohortEvent::DuplicateIdentifier { rfid, .. } => {
                format!("RFID {} is already assigned", rfid)
            }
            CohortEvent::CapacityExceeded { rfid, .. } => {
                format!("No group has room for RFID {}", rfid)
            }
            CohortEvent::DeviceUnavailable { message, .. } => {
                format!("Scanner unavailable: {}", message)
            }
            CohortEvent::StoreWriteFailed { rfid, message, .. } => {
                format!("Could not save RFID {}: {}", rfid, message)
            }
            CohortEvent::ListenerStateChanged { new_state, .. } => {
                format!("Listener is now {:?}", new_state)
            }
            CohortEvent::IngestionComplete { total, .. } => {
                format!("All {} animals have RFIDs", total)
            }
        }
    }
}

/// Fire-and-forget notification target
///
/// Implementations must not block the caller.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: CohortEvent);
}

/// Bounded notification queue
///
/// `notify` uses `try_send`: a full or closed queue drops the event with a
/// warning instead of stalling the ingestor.
#[derive(Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<CohortEvent>,
    capacity: usize,
}

impl NotificationQueue {
    /// Create a queue and the receiver the presentation layer drains
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<CohortEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                capacity: capacity.max(1),
            },
            rx,
        )
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl NotificationSink for NotificationQueue {
    fn notify(&self, event: CohortEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(kind = ?event.kind(), "Notification queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                warn!(kind = ?event.kind(), "Notification receiver closed, dropping event");
            }
        }
    }
}

/// Sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&self, _event: CohortEvent) {}
}
