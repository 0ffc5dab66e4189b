//! Per-file store sharing
//!
//! At most one live [`AssignmentStore`] exists per canonical file path.
//! Holders are counted; the last [`StoreRegistry::release`] closes the pool.
//! In-memory stores are never shared.

use super::AssignmentStore;
use mouser_common::config::StoreConfig;
use mouser_common::Result;
use std::collections::HashMap;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// What to open
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreScope {
    File(PathBuf),
    InMemory,
}

struct Entry {
    store: Arc<AssignmentStore>,
    holders: usize,
}

struct RegistryInner {
    config: StoreConfig,
    entries: Mutex<HashMap<PathBuf, Entry>>,
}

/// Reference-counted map of open experiment files
#[derive(Clone)]
pub struct StoreRegistry {
    inner: Arc<RegistryInner>,
}

impl StoreRegistry {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Open or share a store
    ///
    /// Two acquisitions of the same canonical path share one store. Schema
    /// mismatches surface as `Error::Schema` and leave nothing registered.
    pub async fn acquire(&self, scope: StoreScope) -> Result<StoreHandle> {
        let path = match scope {
            StoreScope::InMemory => {
                let store = AssignmentStore::open_in_memory().await?;
                return Ok(StoreHandle::new(Arc::new(store), None));
            }
            StoreScope::File(path) => path,
        };

        let key = canonical_key(&path)?;
        let mut entries = self.inner.entries.lock().await;

        if let Some(entry) = entries.get_mut(&key) {
            if !entry.store.is_closed() {
                entry.holders += 1;
                debug!(path = %key.display(), holders = entry.holders, "Sharing open store");
                return Ok(StoreHandle::new(entry.store.clone(), Some(key)));
            }
            entries.remove(&key);
        }

        let store = Arc::new(AssignmentStore::open_file(&key, &self.inner.config).await?);
        entries.insert(
            key.clone(),
            Entry {
                store: store.clone(),
                holders: 1,
            },
        );
        info!(path = %key.display(), "Store registered");

        Ok(StoreHandle::new(store, Some(key)))
    }

    /// Give up a handle; idempotent per handle
    pub async fn release(&self, handle: &StoreHandle) {
        if handle.released.swap(true, Ordering::SeqCst) {
            return;
        }

        let key = match &handle.key {
            None => {
                handle.store.close().await;
                return;
            }
            Some(key) => key,
        };

        let mut entries = self.inner.entries.lock().await;
        let last = match entries.get_mut(key) {
            Some(entry) => {
                entry.holders = entry.holders.saturating_sub(1);
                entry.holders == 0
            }
            None => false,
        };

        if last {
            if let Some(entry) = entries.remove(key) {
                entry.store.close().await;
                info!(path = %key.display(), "Last holder released, store closed");
            }
        }
    }

    /// Current number of holders of a file (0 when not open)
    pub async fn holders(&self, path: &Path) -> usize {
        let key = match canonical_key(path) {
            Ok(key) => key,
            Err(_) => return 0,
        };
        self.inner
            .entries
            .lock()
            .await
            .get(&key)
            .map(|e| e.holders)
            .unwrap_or(0)
    }

    /// Number of distinct files currently open
    pub async fn open_files(&self) -> usize {
        self.inner.entries.lock().await.len()
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

/// Absolute path with symlinks and `..` resolved
///
/// The file itself may not exist yet; its parent directory is created so
/// that the parent can be canonicalized.
fn canonical_key(path: &Path) -> Result<PathBuf> {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return Ok(canonical);
    }

    let file_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;
    Ok(std::fs::canonicalize(&parent)?.join(file_name))
}

/// Shared access to an open store
pub struct StoreHandle {
    store: Arc<AssignmentStore>,
    key: Option<PathBuf>,
    released: AtomicBool,
}

impl StoreHandle {
    fn new(store: Arc<AssignmentStore>, key: Option<PathBuf>) -> Self {
        Self {
            store,
            key,
            released: AtomicBool::new(false),
        }
    }

    /// Owned pointer for components that outlive the handle borrow
    pub fn store(&self) -> Arc<AssignmentStore> {
        self.store.clone()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Whether both handles point at the same live store
    pub fn same_store(&self, other: &StoreHandle) -> bool {
        Arc::ptr_eq(&self.store, &other.store)
    }
}

impl Deref for StoreHandle {
    type Target = AssignmentStore;

    fn deref(&self) -> &AssignmentStore {
        &self.store
    }
}
