//! Scan device abstraction

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mouser_common::Result;
use std::time::Duration;

/// One undecoded read from a scan channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub data: String,
    pub received_at: DateTime<Utc>,
}

impl RawEvent {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            received_at: Utc::now(),
        }
    }
}

/// An open connection to a scanner
///
/// `read_event` must be cancel-safe: the listener drops the pending future
/// on stop, and a later call must not lose data already received.
#[async_trait]
pub trait ScanChannel: Send {
    /// Wait up to `timeout` for one event; `Ok(None)` when nothing arrived
    async fn read_event(&mut self, timeout: Duration) -> Result<Option<RawEvent>>;

    /// Release the device; calling it again is a no-op
    async fn close(&mut self);
}

/// Opens scan channels
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    /// Short label for logs and notifications
    fn describe(&self) -> String;

    /// Fails with `Error::DeviceUnavailable` when the device cannot be opened
    async fn open(&self) -> Result<Box<dyn ScanChannel>>;
}
