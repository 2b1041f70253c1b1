//! Driver-wide counters.
//!
//! Counters are `AtomicU64` and never reset; reading them needs no lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared counter storage updated by the driver.
#[derive(Debug, Clone, Default)]
pub struct DriverMetricsStorage {
    inner: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    volumes_created: AtomicU64,
    volumes_removed: AtomicU64,
    mounts_issued: AtomicU64,
    unmounts_issued: AtomicU64,
    tool_failures: AtomicU64,
}

impl DriverMetricsStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn volume_created(&self) {
        self.inner.volumes_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn volume_removed(&self) {
        self.inner.volumes_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mount_issued(&self) {
        self.inner.mounts_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn unmount_issued(&self) {
        self.inner.unmounts_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn tool_failed(&self) {
        self.inner.tool_failures.fetch_add(1, Ordering::Relaxed);
    }
}

/// Read-only view over [`DriverMetricsStorage`].
#[derive(Debug, Clone)]
pub struct DriverMetrics {
    storage: DriverMetricsStorage,
}

impl DriverMetrics {
    pub(crate) fn new(storage: DriverMetricsStorage) -> Self {
        Self { storage }
    }

    /// Volumes successfully created (re-creates included).
    pub fn volumes_created_total(&self) -> u64 {
        self.storage.inner.volumes_created.load(Ordering::Relaxed)
    }

    pub fn volumes_removed_total(&self) -> u64 {
        self.storage.inner.volumes_removed.load(Ordering::Relaxed)
    }

    /// Mount commands issued (only on a 0 -> 1 reference transition).
    pub fn mounts_issued_total(&self) -> u64 {
        self.storage.inner.mounts_issued.load(Ordering::Relaxed)
    }

    /// Unmount commands issued (only when the reference count reaches 0).
    pub fn unmounts_issued_total(&self) -> u64 {
        self.storage.inner.unmounts_issued.load(Ordering::Relaxed)
    }

    pub fn tool_failures_total(&self) -> u64 {
        self.storage.inner.tool_failures.load(Ordering::Relaxed)
    }
}
