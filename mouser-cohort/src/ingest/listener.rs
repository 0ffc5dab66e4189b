//! Identification ingestor
//!
//! One background task per active listener. The task reads raw scans,
//! drops repeats and blanks, places each new identifier through the
//! capacity planner and reports every outcome to the notification sink.
//! It stops on cancellation, on a channel error, or once every expected
//! subject has an identifier.

use super::channel::{DeviceConnector, RawEvent, ScanChannel};
use super::normalize::{normalize_identifier, Debouncer};
use crate::planner::CapacityPlanner;
use crate::store::retry_store_write;
use chrono::Utc;
use mouser_common::config::ListenerConfig;
use mouser_common::{CohortEvent, Error, ListenerState, NotificationSink, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Control handle for one listener task
///
/// Clones share the same task. `join` may be called from several clones;
/// the first awaits the task, the others wait for the `Idle` state.
#[derive(Clone)]
pub struct ListenerHandle {
    id: u64,
    cancel: CancellationToken,
    state: watch::Receiver<ListenerState>,
    task: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl ListenerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    /// Request the task to stop; returns immediately
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait until the task has closed its channel and gone `Idle`
    pub async fn join(&self) {
        let task = self.task.lock().ok().and_then(|mut slot| slot.take());

        match task {
            Some(task) => {
                if let Err(e) = task.await {
                    error!(listener_id = self.id, error = %e, "Listener task failed");
                }
            }
            None => {
                let mut state = self.state.clone();
                // Err only when the task is gone, which also means it is done
                let _ = state.wait_for(|s| *s == ListenerState::Idle).await;
            }
        }
    }

    /// Cancel and wait; safe to call any number of times
    pub async fn stop(&self) {
        self.cancel();
        self.join().await;
    }
}

/// Turns scans into placed subjects
pub struct IdentificationIngestor {
    planner: CapacityPlanner,
    connector: Arc<dyn DeviceConnector>,
    sink: Arc<dyn NotificationSink>,
    read_timeout: Duration,
    poll_interval: Duration,
    current: Mutex<Option<ListenerHandle>>,
    next_id: AtomicU64,
}

impl IdentificationIngestor {
    pub fn new(
        planner: CapacityPlanner,
        connector: Arc<dyn DeviceConnector>,
        sink: Arc<dyn NotificationSink>,
        config: &ListenerConfig,
    ) -> Self {
        Self {
            planner,
            connector,
            sink,
            read_timeout: config.read_timeout(),
            poll_interval: config.poll_interval(),
            current: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// State of the most recently started listener
    pub async fn state(&self) -> ListenerState {
        match self.current.lock().await.as_ref() {
            Some(handle) => handle.state(),
            None => ListenerState::Idle,
        }
    }

    /// Open the device and spawn a listener
    ///
    /// A listener that is still running is stopped (and its channel closed)
    /// before the device is opened again. If the device cannot be opened the
    /// state stays `Idle`, a `DeviceUnavailable` notification goes out and
    /// `Error::DeviceUnavailable` is returned.
    pub async fn start_listening(&self) -> Result<ListenerHandle> {
        let mut current = self.current.lock().await;

        if let Some(stale) = current.take() {
            if stale.state() == ListenerState::Listening {
                info!(listener_id = stale.id(), "Stopping running listener before restart");
            }
            stale.stop().await;
        }

        let channel = match self.connector.open().await {
            Ok(channel) => channel,
            Err(e) => {
                let message = match e {
                    Error::DeviceUnavailable(message) => message,
                    other => other.to_string(),
                };
                warn!(device = %self.connector.describe(), error = %message, "Scan device unavailable");
                self.sink.notify(CohortEvent::DeviceUnavailable {
                    message: message.clone(),
                    timestamp: Utc::now(),
                });
                return Err(Error::DeviceUnavailable(message));
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(ListenerState::Listening);

        info!(listener_id = id, device = %self.connector.describe(), "Listener started");
        self.sink.notify(CohortEvent::ListenerStateChanged {
            old_state: ListenerState::Idle,
            new_state: ListenerState::Listening,
            timestamp: Utc::now(),
        });

        let worker = ListenerWorker {
            id,
            planner: self.planner.clone(),
            sink: self.sink.clone(),
            read_timeout: self.read_timeout,
            poll_interval: self.poll_interval,
        };
        let task = tokio::spawn(worker.run(channel, cancel.clone(), state_tx));

        let handle = ListenerHandle {
            id,
            cancel,
            state: state_rx,
            task: Arc::new(std::sync::Mutex::new(Some(task))),
        };
        *current = Some(handle.clone());

        Ok(handle)
    }

    /// Stop the current listener, if any; idempotent
    pub async fn stop_listening(&self) {
        let mut current = self.current.lock().await;
        if let Some(handle) = current.take() {
            handle.stop().await;
            debug!(listener_id = handle.id(), "Listener stopped");
        }
    }
}

enum Flow {
    Continue,
    Complete,
}

struct ListenerWorker {
    id: u64,
    planner: CapacityPlanner,
    sink: Arc<dyn NotificationSink>,
    read_timeout: Duration,
    poll_interval: Duration,
}

impl ListenerWorker {
    async fn run(
        self,
        mut channel: Box<dyn ScanChannel>,
        cancel: CancellationToken,
        state_tx: watch::Sender<ListenerState>,
    ) {
        let mut debouncer = Debouncer::new();

        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                read = channel.read_event(self.read_timeout) => read,
            };

            match read {
                Ok(Some(event)) => {
                    if let Flow::Complete = self.handle_event(&mut debouncer, event).await {
                        break;
                    }
                }
                Ok(None) => {
                    if !self.poll_interval.is_zero() {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(self.poll_interval) => {}
                        }
                    }
                }
                Err(e) => {
                    warn!(listener_id = self.id, error = %e, "Scan channel failed, stopping listener");
                    self.sink.notify(CohortEvent::DeviceUnavailable {
                        message: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    break;
                }
            }
        }

        channel.close().await;
        state_tx.send_replace(ListenerState::Idle);
        self.sink.notify(CohortEvent::ListenerStateChanged {
            old_state: ListenerState::Listening,
            new_state: ListenerState::Idle,
            timestamp: Utc::now(),
        });
        info!(listener_id = self.id, "Listener idle");
    }

    async fn handle_event(&self, debouncer: &mut Debouncer, event: RawEvent) -> Flow {
        if debouncer.is_repeat(&event.data) {
            trace!(listener_id = self.id, raw = %event.data, "Repeated scan dropped");
            return Flow::Continue;
        }

        let Some(rfid) = normalize_identifier(&event.data) else {
            trace!(listener_id = self.id, "Blank scan dropped");
            return Flow::Continue;
        };

        let planner = self.planner.clone();
        let scanned = rfid.clone();
        let result = retry_store_write("ingest scan", move || {
            let planner = planner.clone();
            let scanned = scanned.clone();
            async move { planner.place_new_subject(Some(scanned.as_str()), "").await }
        })
        .await;

        match result {
            Ok(placement) => {
                info!(
                    listener_id = self.id,
                    rfid = %rfid,
                    subject_id = placement.subject_id,
                    group_id = placement.group_id,
                    "Scan ingested"
                );
                debouncer.record(&event.data);
                self.sink.notify(CohortEvent::SubjectIngested {
                    subject_id: placement.subject_id,
                    group_id: placement.group_id,
                    rfid,
                    timestamp: Utc::now(),
                });
                self.check_complete().await
            }
            Err(Error::DuplicateIdentifier(rfid)) => {
                debug!(listener_id = self.id, rfid = %rfid, "Identifier already active");
                debouncer.record(&event.data);
                self.sink.notify(CohortEvent::DuplicateIdentifier {
                    rfid,
                    timestamp: Utc::now(),
                });
                Flow::Continue
            }
            Err(Error::CapacityExceeded { reason, .. }) => {
                warn!(listener_id = self.id, rfid = %rfid, reason = %reason, "No room for scanned subject");
                self.sink.notify(CohortEvent::CapacityExceeded {
                    rfid,
                    timestamp: Utc::now(),
                });
                Flow::Continue
            }
            Err(e) => {
                error!(listener_id = self.id, rfid = %rfid, error = %e, "Scan dropped, commit failed");
                self.sink.notify(CohortEvent::StoreWriteFailed {
                    rfid,
                    message: e.to_string(),
                    timestamp: Utc::now(),
                });
                Flow::Continue
            }
        }
    }

    /// Stop once every expected subject has an identifier
    async fn check_complete(&self) -> Flow {
        let store = self.planner.store();

        let progress = async {
            let expected = store.expected_total().await?;
            let tagged = store.count_active_with_rfid().await?;
            Ok::<_, Error>((expected, tagged))
        };

        match progress.await {
            Ok((expected, tagged)) if expected > 0 && tagged >= expected => {
                info!(listener_id = self.id, total = expected, "All expected subjects identified");
                self.sink.notify(CohortEvent::IngestionComplete {
                    total: expected,
                    timestamp: Utc::now(),
                });
                Flow::Complete
            }
            Ok(_) => Flow::Continue,
            Err(e) => {
                warn!(listener_id = self.id, error = %e, "Could not check ingestion progress");
                Flow::Continue
            }
        }
    }
}
