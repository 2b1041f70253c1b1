//! Volume registry guarded by a single reader/writer lock.
//!
//! The registry owns both the in-memory records and the snapshot store.
//! Callers do not lock individual map operations; they take a guard for the
//! whole lifecycle operation:
//!
//! - **Readers** (`path`, `get`, `list`) hold [`RegistryReadGuard`] and may run
//!   concurrently with each other.
//! - **Writers** (`create`, `remove`, `mount`, `unmount`) hold
//!   [`RegistryWriteGuard`] across their external tool calls and the final
//!   [`RegistryWriteGuard::commit`], so no mutation ever overlaps another
//!   mutation or a read.

use std::sync::Arc;

use chrono::Utc;
use loopvol_shared::LoopvolResult;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::store::{StateStore, VolumeMap};
use crate::volumes::VolumeRecord;

/// Shared handle to the registry.
///
/// Cloneable via `Arc`; all clones see the same records.
#[derive(Clone)]
pub struct VolumeRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

struct RegistryInner {
    volumes: VolumeMap,
    store: StateStore,
}

impl std::fmt::Debug for VolumeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeRegistry").finish()
    }
}

impl VolumeRegistry {
    /// Build the registry from the persisted snapshot.
    ///
    /// Reference counts are reset to zero: after a restart no consumer is
    /// tracked and the real mount table is not consulted. Records without a
    /// creation time get one. When either happens, or the snapshot came from
    /// the fallback path, the snapshot is rewritten once so later loads see
    /// the same records.
    pub fn load(store: StateStore) -> LoopvolResult<Self> {
        let mut rewrite = store.reads_fallback();
        let mut volumes = store.load()?;

        let now = Utc::now();
        for record in volumes.values_mut() {
            if record.connections != 0 {
                tracing::warn!(
                    volume = %record.name,
                    connections = record.connections,
                    "Discarding persisted reference count"
                );
                record.connections = 0;
                rewrite = true;
            }
            if !record.has_creation_time() {
                record.created_at = now;
                rewrite = true;
            }
        }

        if rewrite {
            if let Err(e) = store.save(&volumes) {
                tracing::warn!(
                    state_path = %store.path().display(),
                    error = %e,
                    "Failed to rewrite normalized state"
                );
            }
        }

        tracing::info!(
            state_path = %store.path().display(),
            volumes = volumes.len(),
            "Volume registry loaded"
        );

        Ok(Self {
            inner: Arc::new(RwLock::new(RegistryInner { volumes, store })),
        })
    }

    /// Take the shared lock.
    pub async fn read(&self) -> RegistryReadGuard<'_> {
        RegistryReadGuard {
            inner: self.inner.read().await,
        }
    }

    /// Take the exclusive lock.
    pub async fn write(&self) -> RegistryWriteGuard<'_> {
        RegistryWriteGuard {
            inner: self.inner.write().await,
        }
    }
}

/// Shared access to the records.
pub struct RegistryReadGuard<'a> {
    inner: RwLockReadGuard<'a, RegistryInner>,
}

impl RegistryReadGuard<'_> {
    pub fn get(&self, name: &str) -> Option<&VolumeRecord> {
        self.inner.volumes.get(name)
    }

    /// All records, sorted by name.
    pub fn list(&self) -> Vec<&VolumeRecord> {
        let mut records: Vec<&VolumeRecord> = self.inner.volumes.values().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }
}

/// Exclusive access to the records and the snapshot store.
pub struct RegistryWriteGuard<'a> {
    inner: RwLockWriteGuard<'a, RegistryInner>,
}

impl RegistryWriteGuard<'_> {
    pub fn get(&self, name: &str) -> Option<&VolumeRecord> {
        self.inner.volumes.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut VolumeRecord> {
        self.inner.volumes.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.volumes.contains_key(name)
    }

    /// Insert or overwrite the record stored under its name.
    pub fn insert(&mut self, record: VolumeRecord) -> Option<VolumeRecord> {
        self.inner.volumes.insert(record.name.clone(), record)
    }

    pub fn remove(&mut self, name: &str) -> Option<VolumeRecord> {
        self.inner.volumes.remove(name)
    }

    /// Persist the current records.
    ///
    /// A failed write is logged and otherwise ignored: the next successful
    /// commit rewrites the full snapshot.
    pub fn commit(&self) {
        if let Err(e) = self.inner.store.save(&self.inner.volumes) {
            tracing::error!(
                state_path = %self.inner.store.path().display(),
                error = %e,
                "Failed to save state"
            );
        }
    }
}
