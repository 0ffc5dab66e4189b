//! In-process scanner
//!
//! Feeds scans from code instead of hardware. Counts open channels so
//! callers can check that restarts never leave two channels open.

use super::channel::{DeviceConnector, RawEvent, ScanChannel};
use async_trait::async_trait;
use mouser_common::{Error, Result};
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

struct ScannerState {
    tx: mpsc::UnboundedSender<String>,
    rx: Mutex<mpsc::UnboundedReceiver<String>>,
    open_channels: AtomicUsize,
    peak_open: AtomicUsize,
    total_opens: AtomicUsize,
    fail_open: AtomicBool,
}

#[derive(Clone)]
pub struct SimulatedScanner {
    state: Arc<ScannerState>,
}

impl SimulatedScanner {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(ScannerState {
                tx,
                rx: Mutex::new(rx),
                open_channels: AtomicUsize::new(0),
                peak_open: AtomicUsize::new(0),
                total_opens: AtomicUsize::new(0),
                fail_open: AtomicBool::new(false),
            }),
        }
    }

    /// Queue one raw read, exactly as the device would deliver it
    pub fn scan(&self, raw: impl Into<String>) {
        // The receiver lives in `state`, so the send cannot fail
        let _ = self.state.tx.send(raw.into());
    }

    /// Make subsequent `open` calls fail
    pub fn set_fail_open(&self, fail: bool) {
        self.state.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn open_channels(&self) -> usize {
        self.state.open_channels.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open channels seen so far
    pub fn peak_open_channels(&self) -> usize {
        self.state.peak_open.load(Ordering::SeqCst)
    }

    pub fn total_opens(&self) -> usize {
        self.state.total_opens.load(Ordering::SeqCst)
    }
}

impl Default for SimulatedScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Seven-digit tag number in the range handed out by bench readers
pub fn random_rfid<R: Rng + ?Sized>(rng: &mut R) -> String {
    rng.gen_range(1_000_000..=9_999_999u32).to_string()
}

#[async_trait]
impl DeviceConnector for SimulatedScanner {
    fn describe(&self) -> String {
        "simulated scanner".to_string()
    }

    async fn open(&self) -> Result<Box<dyn ScanChannel>> {
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(Error::DeviceUnavailable(
                "simulated scanner refused to open".to_string(),
            ));
        }

        let now_open = self.state.open_channels.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak_open.fetch_max(now_open, Ordering::SeqCst);
        self.state.total_opens.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(SimulatedChannel {
            state: self.state.clone(),
            open: true,
        }))
    }
}

struct SimulatedChannel {
    state: Arc<ScannerState>,
    open: bool,
}

impl SimulatedChannel {
    fn release(&mut self) {
        if self.open {
            self.open = false;
            self.state.open_channels.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl ScanChannel for SimulatedChannel {
    async fn read_event(&mut self, timeout: Duration) -> Result<Option<RawEvent>> {
        if !self.open {
            return Err(Error::DeviceUnavailable("simulated channel is closed".to_string()));
        }

        let read = async {
            let mut rx = self.state.rx.lock().await;
            rx.recv().await
        };

        match tokio::time::timeout(timeout, read).await {
            Err(_) | Ok(None) => Ok(None),
            Ok(Some(data)) => Ok(Some(RawEvent::new(data))),
        }
    }

    async fn close(&mut self) {
        self.release();
    }
}

impl Drop for SimulatedChannel {
    fn drop(&mut self) {
        self.release();
    }
}
