//! Volume lifecycle controller.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use loopvol_shared::{Capabilities, LoopvolError, LoopvolResult, Scope, VolumeInfo};

use crate::fs;
use crate::init_logging_for;
use crate::runtime::layout::FilesystemLayout;
use crate::runtime::lock::RuntimeLock;
use crate::runtime::metrics::{DriverMetrics, DriverMetricsStorage};
use crate::runtime::options::{CreateOptions, DriverOptions};
use crate::store::StateStore;
use crate::util::{SystemToolRunner, ToolRunner};
use crate::volumes::constants::{ext4, tools};
use crate::volumes::{VolumeRecord, VolumeRegistry, validate_name, validate_size};

/// Entry point for volume lifecycle operations.
///
/// **Locking**: every mutating operation (`create`, `remove`, `mount`,
/// `unmount`) holds the registry's exclusive lock from its first lookup until
/// the snapshot is written, including the time spent in external tools.
/// `path`, `get` and `list` share the lock with each other. Mutations are
/// therefore fully serialized; a slow `mke2fs` delays every other request.
///
/// **Cloning**: cheap via `Arc`; all clones drive the same registry.
#[derive(Clone)]
pub struct VolumeDriver {
    inner: DriverInner,
}

type DriverInner = Arc<DriverInnerImpl>;

struct DriverInnerImpl {
    registry: VolumeRegistry,
    tools: Arc<dyn ToolRunner>,
    layout: FilesystemLayout,
    default_size: String,
    metrics: DriverMetricsStorage,
    /// Held for the driver's lifetime so no second process owns the root.
    _runtime_lock: RuntimeLock,
}

impl VolumeDriver {
    /// Open the driver rooted at `options.root_dir`, running real host tools.
    ///
    /// Installs file logging under `<root>/logs` on first use.
    ///
    /// # Errors
    ///
    /// Returns [`LoopvolError::Initialization`] if:
    /// - the root is not an absolute, existing directory
    /// - another process holds the root
    /// - the snapshot cannot be read or decoded
    pub fn new(options: DriverOptions) -> LoopvolResult<Self> {
        let layout = FilesystemLayout::new(options.root_dir.clone(), &options.state_file);
        layout.prepare()?;
        init_logging_for(&layout)?;

        Self::open(options, layout, Arc::new(SystemToolRunner))
    }

    /// Open the driver on a layout the caller already prepared, running real
    /// host tools. Logging is left to the caller.
    pub fn from_layout(options: DriverOptions, layout: FilesystemLayout) -> LoopvolResult<Self> {
        Self::open(options, layout, Arc::new(SystemToolRunner))
    }

    /// Open the driver with a caller-supplied tool runner.
    pub fn with_tools(options: DriverOptions, tools: Arc<dyn ToolRunner>) -> LoopvolResult<Self> {
        let layout = FilesystemLayout::new(options.root_dir.clone(), &options.state_file);
        layout.prepare()?;

        Self::open(options, layout, tools)
    }

    fn open(
        options: DriverOptions,
        layout: FilesystemLayout,
        tools: Arc<dyn ToolRunner>,
    ) -> LoopvolResult<Self> {
        validate_size(&options.default_size)?;

        let runtime_lock = RuntimeLock::acquire(&layout.lock_path())?;
        let store = StateStore::new(layout.state_path()).with_fallback(layout.legacy_state_path());
        let registry = VolumeRegistry::load(store)?;

        tracing::debug!(root = %layout.root().display(), "Initialized volume driver");

        Ok(Self {
            inner: Arc::new(DriverInnerImpl {
                registry,
                tools,
                layout,
                default_size: options.default_size,
                metrics: DriverMetricsStorage::new(),
                _runtime_lock: runtime_lock,
            }),
        })
    }

    pub fn layout(&self) -> &FilesystemLayout {
        &self.inner.layout
    }

    /// Lock-free snapshot of the driver counters.
    pub fn metrics(&self) -> DriverMetrics {
        DriverMetrics::new(self.inner.metrics.clone())
    }

    /// Create (or re-create) a volume.
    ///
    /// Allocates `<root>/fs/<name>`, sizes it with `truncate`, formats it as
    /// ext4, then records and persists the volume.
    ///
    /// Re-creating an existing, unreferenced name reformats its backing file
    /// and overwrites the record. Re-creating a referenced name fails with
    /// [`LoopvolError::InUse`].
    pub async fn create(&self, name: &str, options: CreateOptions) -> LoopvolResult<()> {
        tracing::debug!(method = "create", volume = name, size = ?options.size, "Request");
        self.inner
            .create(name, options)
            .await
            .inspect_err(|e| log_op_error("create", name, e))
    }

    /// Remove an unreferenced volume with its mount point and backing file.
    pub async fn remove(&self, name: &str) -> LoopvolResult<()> {
        tracing::debug!(method = "remove", volume = name, "Request");
        self.inner
            .remove(name)
            .await
            .inspect_err(|e| log_op_error("remove", name, e))
    }

    /// Add a consumer, mounting the volume if it is the first one.
    ///
    /// Returns the mount point.
    pub async fn mount(&self, name: &str) -> LoopvolResult<PathBuf> {
        tracing::debug!(method = "mount", volume = name, "Request");
        self.inner
            .mount(name)
            .await
            .inspect_err(|e| log_op_error("mount", name, e))
    }

    /// Drop a consumer, unmounting the volume when none remain.
    ///
    /// The reference count reaches zero even when `umount` fails; the
    /// failure is still returned.
    pub async fn unmount(&self, name: &str) -> LoopvolResult<()> {
        tracing::debug!(method = "unmount", volume = name, "Request");
        self.inner
            .unmount(name)
            .await
            .inspect_err(|e| log_op_error("unmount", name, e))
    }

    /// Mount point of a volume.
    pub async fn path(&self, name: &str) -> LoopvolResult<PathBuf> {
        tracing::debug!(method = "path", volume = name, "Request");
        let registry = self.inner.registry.read().await;
        registry
            .get(name)
            .map(|record| record.mount_point.clone())
            .ok_or_else(|| not_found(name))
            .inspect_err(|e| log_op_error("path", name, e))
    }

    pub async fn get(&self, name: &str) -> LoopvolResult<VolumeInfo> {
        tracing::debug!(method = "get", volume = name, "Request");
        let registry = self.inner.registry.read().await;
        registry
            .get(name)
            .map(VolumeRecord::info)
            .ok_or_else(|| not_found(name))
            .inspect_err(|e| log_op_error("get", name, e))
    }

    /// All volumes, sorted by name.
    pub async fn list(&self) -> LoopvolResult<Vec<VolumeInfo>> {
        tracing::debug!(method = "list", "Request");
        let registry = self.inner.registry.read().await;
        Ok(registry.list().into_iter().map(VolumeRecord::info).collect())
    }

    /// Full record of a volume, including size and reference count.
    pub async fn inspect(&self, name: &str) -> LoopvolResult<VolumeRecord> {
        let registry = self.inner.registry.read().await;
        registry.get(name).cloned().ok_or_else(|| not_found(name))
    }

    /// Volumes live on this node only.
    pub fn capabilities(&self) -> Capabilities {
        tracing::debug!(method = "capabilities", "Request");
        Capabilities {
            scope: Scope::Local,
        }
    }
}

impl DriverInnerImpl {
    async fn create(&self, name: &str, options: CreateOptions) -> LoopvolResult<()> {
        validate_name(name)?;
        let size = options.size.unwrap_or_else(|| self.default_size.clone());
        validate_size(&size)?;

        let mut registry = self.registry.write().await;

        if let Some(record) = registry.get(name).filter(|r| r.is_in_use()) {
            return Err(LoopvolError::InUse {
                name: name.to_string(),
                connections: record.connections,
            });
        }
        let existed = registry.contains(name);

        let backing_file = self.layout.backing_file(name);
        if let Err(e) = self.format_backing_file(&backing_file, &size).await {
            if !existed {
                if let Err(cleanup) = fs::remove_all(&backing_file).await {
                    tracing::warn!(
                        volume = name,
                        error = %cleanup,
                        "Failed to clean up backing file after failed create"
                    );
                }
            }
            return Err(e);
        }

        let record = VolumeRecord::new(name, &size, self.layout.mount_point(name));
        if registry.insert(record).is_some() {
            tracing::warn!(volume = name, "Re-created existing volume, backing file reformatted");
        }
        registry.commit();
        self.metrics.volume_created();

        tracing::info!(volume = name, size = %size, "Created volume");
        Ok(())
    }

    /// touch + truncate + mke2fs
    async fn format_backing_file(&self, backing_file: &Path, size: &str) -> LoopvolResult<()> {
        fs::touch(backing_file).await?;

        let file_arg = backing_file.to_string_lossy().into_owned();
        self.run_tool(
            tools::TRUNCATE,
            &["-s".to_string(), size.to_string(), file_arg.clone()],
        )
        .await?;
        self.run_tool(
            ext4::MKFS,
            &[
                "-t".to_string(),
                ext4::FS_TYPE.to_string(),
                "-F".to_string(),
                file_arg,
            ],
        )
        .await?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> LoopvolResult<()> {
        let mut registry = self.registry.write().await;

        let record = registry.get(name).ok_or_else(|| not_found(name))?;
        if record.is_in_use() {
            return Err(LoopvolError::InUse {
                name: name.to_string(),
                connections: record.connections,
            });
        }
        let mount_point = record.mount_point.clone();

        fs::remove_all(&mount_point).await?;
        fs::remove_all(&self.layout.backing_file(name)).await?;

        registry.remove(name);
        registry.commit();
        self.metrics.volume_removed();

        tracing::info!(volume = name, "Removed volume");
        Ok(())
    }

    async fn mount(&self, name: &str) -> LoopvolResult<PathBuf> {
        let mut registry = self.registry.write().await;

        let record = registry.get(name).ok_or_else(|| not_found(name))?;
        let mount_point = record.mount_point.clone();

        if record.connections == 0 {
            fs::ensure_mount_point(&mount_point).await?;

            let backing_file = self.layout.backing_file(name);
            self.metrics.mount_issued();
            self.run_tool(
                tools::MOUNT,
                &[
                    backing_file.to_string_lossy().into_owned(),
                    mount_point.to_string_lossy().into_owned(),
                ],
            )
            .await?;
            tracing::info!(volume = name, mount_point = %mount_point.display(), "Mounted volume");
        }

        let record = registry
            .get_mut(name)
            .ok_or_else(|| LoopvolError::Internal(format!("volume {} vanished while locked", name)))?;
        record.connections = record.connections.checked_add(1).ok_or_else(|| {
            LoopvolError::Internal(format!("reference count overflow on volume {}", name))
        })?;
        let connections = record.connections;
        registry.commit();

        tracing::debug!(volume = name, connections, "Volume reference added");
        Ok(mount_point)
    }

    async fn unmount(&self, name: &str) -> LoopvolResult<()> {
        let mut registry = self.registry.write().await;

        let record = registry.get_mut(name).ok_or_else(|| not_found(name))?;

        if record.connections > 1 {
            record.connections -= 1;
            let connections = record.connections;
            registry.commit();
            tracing::debug!(volume = name, connections, "Volume reference dropped");
            return Ok(());
        }

        // Last (or no) reference: clamp to zero whatever umount reports.
        record.connections = 0;
        let mount_point = record.mount_point.clone();

        self.metrics.unmount_issued();
        let result = self
            .run_tool(
                tools::UMOUNT,
                &[mount_point.to_string_lossy().into_owned()],
            )
            .await;
        registry.commit();

        if result.is_ok() {
            tracing::info!(volume = name, mount_point = %mount_point.display(), "Unmounted volume");
        }
        result.map(|_| ())
    }

    async fn run_tool(&self, program: &str, args: &[String]) -> LoopvolResult<String> {
        match self.tools.run(program, args).await {
            Ok(output) => {
                if !output.trim().is_empty() {
                    tracing::debug!(command = program, output = %output.trim(), "Tool output");
                }
                Ok(output)
            }
            Err(e) => {
                self.metrics.tool_failed();
                Err(e)
            }
        }
    }
}

fn not_found(name: &str) -> LoopvolError {
    LoopvolError::NotFound(name.to_string())
}

fn log_op_error(method: &str, name: &str, err: &LoopvolError) {
    tracing::error!(method, volume = name, error = %err, "Volume operation failed");
}

impl std::fmt::Debug for VolumeDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeDriver")
            .field("root", &self.inner.layout.root())
            .finish()
    }
}

// Compile-time check: the driver is shared across request tasks.
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    let _ = assert_send_sync::<VolumeDriver>;
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::fake::FakeToolRunner;
    use tempfile::TempDir;

    fn create_test_driver(dir: &TempDir) -> (VolumeDriver, Arc<FakeToolRunner>) {
        let tools = Arc::new(FakeToolRunner::new());
        let driver =
            VolumeDriver::with_tools(DriverOptions::with_root(dir.path()), tools.clone()).unwrap();
        (driver, tools)
    }

    async fn connections(driver: &VolumeDriver, name: &str) -> u32 {
        driver.inspect(name).await.unwrap().connections
    }

    #[tokio::test]
    async fn test_data_volume_scenario() {
        let dir = TempDir::new().unwrap();
        let (driver, tools) = create_test_driver(&dir);
        let backing = dir.path().join("fs").join("data");
        let backing_arg = backing.to_string_lossy().into_owned();

        driver
            .create("data", CreateOptions::with_size("5G"))
            .await
            .unwrap();
        assert_eq!(
            tools.calls(),
            vec![
                (
                    "truncate".to_string(),
                    vec!["-s".to_string(), "5G".to_string(), backing_arg.clone()]
                ),
                (
                    "mke2fs".to_string(),
                    vec![
                        "-t".to_string(),
                        "ext4".to_string(),
                        "-F".to_string(),
                        backing_arg.clone()
                    ]
                ),
            ]
        );
        assert!(backing.is_file());

        let mount_point = driver.mount("data").await.unwrap();
        assert_eq!(mount_point, dir.path().join("volumes").join("data"));
        assert!(mount_point.is_dir());
        assert_eq!(tools.count("mount"), 1);
        assert_eq!(connections(&driver, "data").await, 1);

        driver.mount("data").await.unwrap();
        assert_eq!(tools.count("mount"), 1);
        assert_eq!(connections(&driver, "data").await, 2);

        driver.unmount("data").await.unwrap();
        assert_eq!(connections(&driver, "data").await, 1);
        assert_eq!(tools.count("umount"), 0);

        driver.unmount("data").await.unwrap();
        assert_eq!(connections(&driver, "data").await, 0);
        assert_eq!(tools.count("umount"), 1);

        driver.remove("data").await.unwrap();
        assert!(!mount_point.exists());
        assert!(!backing.exists());
        assert!(driver.get("data").await.unwrap_err().is_not_found());

        let metrics = driver.metrics();
        assert_eq!(metrics.volumes_created_total(), 1);
        assert_eq!(metrics.volumes_removed_total(), 1);
        assert_eq!(metrics.mounts_issued_total(), 1);
        assert_eq!(metrics.unmounts_issued_total(), 1);
    }

    #[tokio::test]
    async fn test_default_size() {
        let dir = TempDir::new().unwrap();
        let (driver, tools) = create_test_driver(&dir);

        driver.create("vol", CreateOptions::default()).await.unwrap();

        let (_, args) = &tools.calls()[0];
        assert_eq!(args[1], "10G");
        assert_eq!(driver.inspect("vol").await.unwrap().size, "10G");
    }

    #[tokio::test]
    async fn test_mount_unmount_sequence_counts() {
        let dir = TempDir::new().unwrap();
        let (driver, tools) = create_test_driver(&dir);
        driver.create("v", CreateOptions::default()).await.unwrap();

        // +1 +1 -1 +1 -1 -1 -1(extra) +1
        let ops = [true, true, false, true, false, false, false, true];
        let mut expected: u32 = 0;
        for mount in ops {
            if mount {
                driver.mount("v").await.unwrap();
                expected += 1;
            } else {
                driver.unmount("v").await.unwrap();
                expected = expected.saturating_sub(1);
            }
            assert_eq!(connections(&driver, "v").await, expected);
        }

        // Mounted on each 0 -> 1 transition: initial, and the final one.
        assert_eq!(tools.count("mount"), 2);
        // Unmount issued when reaching 0, plus once for the extra unmount at 0.
        assert_eq!(tools.count("umount"), 2);
    }

    #[tokio::test]
    async fn test_remove_in_use_fails() {
        let dir = TempDir::new().unwrap();
        let (driver, _tools) = create_test_driver(&dir);
        driver.create("busy", CreateOptions::default()).await.unwrap();
        let mount_point = driver.mount("busy").await.unwrap();

        let err = driver.remove("busy").await.unwrap_err();
        assert!(err.is_in_use());

        assert!(driver.get("busy").await.is_ok());
        assert!(mount_point.is_dir());
        assert!(dir.path().join("fs").join("busy").is_file());
        assert_eq!(connections(&driver, "busy").await, 1);
    }

    #[tokio::test]
    async fn test_unknown_volume_is_not_found() {
        let dir = TempDir::new().unwrap();
        let (driver, tools) = create_test_driver(&dir);

        assert!(driver.remove("nope").await.unwrap_err().is_not_found());
        assert!(driver.mount("nope").await.unwrap_err().is_not_found());
        assert!(driver.unmount("nope").await.unwrap_err().is_not_found());
        assert!(driver.path("nope").await.unwrap_err().is_not_found());
        assert!(driver.get("nope").await.unwrap_err().is_not_found());
        assert!(tools.calls().is_empty());
    }

    #[tokio::test]
    async fn test_get_and_path_are_stable() {
        let dir = TempDir::new().unwrap();
        let (driver, _tools) = create_test_driver(&dir);
        driver.create("web", CreateOptions::default()).await.unwrap();

        let first = driver.get("web").await.unwrap();
        let second = driver.get("web").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.name, "web");
        assert_eq!(first.mountpoint, dir.path().join("volumes").join("web"));
        assert_eq!(driver.path("web").await.unwrap(), first.mountpoint);
    }

    #[tokio::test]
    async fn test_restart_preserves_volumes() {
        let dir = TempDir::new().unwrap();
        let before = {
            let (driver, _tools) = create_test_driver(&dir);
            driver
                .create("keep", CreateOptions::with_size("2G"))
                .await
                .unwrap();
            driver.mount("keep").await.unwrap();
            driver.inspect("keep").await.unwrap()
        };

        let (driver, _tools) = create_test_driver(&dir);
        let after = driver.inspect("keep").await.unwrap();
        assert_eq!(after.name, before.name);
        assert_eq!(after.mount_point, before.mount_point);
        assert_eq!(after.size, "2G");
        assert_eq!(after.created_at, before.created_at);
        assert_eq!(after.connections, 0);
    }

    #[tokio::test]
    async fn test_list_after_remove() {
        let dir = TempDir::new().unwrap();
        let (driver, _tools) = create_test_driver(&dir);
        for name in ["a", "b", "c"] {
            driver.create(name, CreateOptions::default()).await.unwrap();
        }
        driver.remove("b").await.unwrap();

        let names: Vec<String> = driver
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.name)
            .collect();
        assert_eq!(names, vec!["a".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_format_leaves_registry_untouched() {
        let dir = TempDir::new().unwrap();
        let (driver, tools) = create_test_driver(&dir);
        tools.fail("mke2fs");

        let err = driver
            .create("bad", CreateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LoopvolError::ToolFailure { ref command, .. } if command.starts_with("mke2fs")));
        assert!(driver.get("bad").await.unwrap_err().is_not_found());
        assert!(!dir.path().join("fs").join("bad").exists());
        assert_eq!(driver.metrics().tool_failures_total(), 1);
    }

    #[tokio::test]
    async fn test_failed_truncate_stops_before_format() {
        let dir = TempDir::new().unwrap();
        let (driver, tools) = create_test_driver(&dir);
        tools.fail("truncate");

        assert!(driver.create("t", CreateOptions::default()).await.is_err());
        assert_eq!(tools.count("mke2fs"), 0);
    }

    #[tokio::test]
    async fn test_failed_mount_keeps_count() {
        let dir = TempDir::new().unwrap();
        let (driver, tools) = create_test_driver(&dir);
        driver.create("m", CreateOptions::default()).await.unwrap();
        tools.fail("mount");

        assert!(driver.mount("m").await.is_err());
        assert_eq!(connections(&driver, "m").await, 0);

        tools.succeed("mount");
        driver.mount("m").await.unwrap();
        assert_eq!(connections(&driver, "m").await, 1);
        assert_eq!(tools.count("mount"), 2);
    }

    #[tokio::test]
    async fn test_mount_point_occupied_by_file() {
        let dir = TempDir::new().unwrap();
        let (driver, tools) = create_test_driver(&dir);
        driver.create("f", CreateOptions::default()).await.unwrap();
        std::fs::write(dir.path().join("volumes").join("f"), b"x").unwrap();

        let err = driver.mount("f").await.unwrap_err();
        assert!(matches!(err, LoopvolError::Storage(_)));
        assert_eq!(tools.count("mount"), 0);
        assert_eq!(connections(&driver, "f").await, 0);
    }

    #[tokio::test]
    async fn test_failed_unmount_still_clamps() {
        let dir = TempDir::new().unwrap();
        let (driver, tools) = create_test_driver(&dir);
        driver.create("u", CreateOptions::default()).await.unwrap();
        driver.mount("u").await.unwrap();
        tools.fail("umount");

        let err = driver.unmount("u").await.unwrap_err();
        assert!(matches!(err, LoopvolError::ToolFailure { .. }));
        assert_eq!(connections(&driver, "u").await, 0);

        // Logical count is zero, so remove is allowed.
        driver.remove("u").await.unwrap();
    }

    #[tokio::test]
    async fn test_recreate_unused_reformats() {
        let dir = TempDir::new().unwrap();
        let (driver, tools) = create_test_driver(&dir);
        driver
            .create("r", CreateOptions::with_size("1G"))
            .await
            .unwrap();
        driver
            .create("r", CreateOptions::with_size("3G"))
            .await
            .unwrap();

        assert_eq!(tools.count("mke2fs"), 2);
        assert_eq!(driver.inspect("r").await.unwrap().size, "3G");
        assert_eq!(driver.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_recreate_in_use_is_refused() {
        let dir = TempDir::new().unwrap();
        let (driver, tools) = create_test_driver(&dir);
        driver.create("r", CreateOptions::default()).await.unwrap();
        driver.mount("r").await.unwrap();

        let err = driver
            .create("r", CreateOptions::with_size("1G"))
            .await
            .unwrap_err();
        assert!(err.is_in_use());
        assert_eq!(tools.count("mke2fs"), 1);
        assert_eq!(driver.inspect("r").await.unwrap().size, "10G");
    }

    #[tokio::test]
    async fn test_invalid_input_rejected_before_side_effects() {
        let dir = TempDir::new().unwrap();
        let (driver, tools) = create_test_driver(&dir);

        let err = driver
            .create("../escape", CreateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LoopvolError::Config(_)));

        let err = driver
            .create("ok", CreateOptions::with_size("lots"))
            .await
            .unwrap_err();
        assert!(matches!(err, LoopvolError::Config(_)));

        assert!(tools.calls().is_empty());
        assert!(!dir.path().join("fs").join("ok").exists());
    }

    #[tokio::test]
    async fn test_second_driver_on_same_root_fails() {
        let dir = TempDir::new().unwrap();
        let (_driver, _tools) = create_test_driver(&dir);

        let err = VolumeDriver::with_tools(
            DriverOptions::with_root(dir.path()),
            Arc::new(FakeToolRunner::new()),
        )
        .unwrap_err();
        assert!(matches!(err, LoopvolError::Initialization(_)));
    }

    #[tokio::test]
    async fn test_corrupt_state_fails_startup() {
        let dir = TempDir::new().unwrap();
        let state_dir = dir.path().join("state");
        std::fs::create_dir_all(&state_dir).unwrap();
        std::fs::write(state_dir.join("loopvol-state.json"), b"[").unwrap();

        let err = VolumeDriver::with_tools(
            DriverOptions::with_root(dir.path()),
            Arc::new(FakeToolRunner::new()),
        )
        .unwrap_err();
        assert!(matches!(err, LoopvolError::Initialization(_)));
    }

    #[tokio::test]
    async fn test_legacy_state_loads() {
        let dir = TempDir::new().unwrap();
        let state_dir = dir.path().join("state");
        std::fs::create_dir_all(&state_dir).unwrap();
        let mount_point = dir.path().join("volumes").join("old");
        let legacy = format!(
            r#"{{"old":{{"Name":"old","Size":"5G","MountPoint":{:?}}}}}"#,
            mount_point.to_string_lossy()
        );
        std::fs::write(state_dir.join("loopvol-state.json"), legacy).unwrap();

        let (driver, _tools) = create_test_driver(&dir);
        let record = driver.inspect("old").await.unwrap();
        assert_eq!(record.size, "5G");
        assert_eq!(record.mount_point, mount_point);
    }

    #[tokio::test]
    async fn test_failed_remove_keeps_record() {
        let dir = TempDir::new().unwrap();
        let state_dir = dir.path().join("state");
        std::fs::create_dir_all(&state_dir).unwrap();
        std::fs::write(
            state_dir.join("loopvol-state.json"),
            r#"{"v":{"Name":"v","Size":"1G","MountPoint":"/proc/self"}}"#,
        )
        .unwrap();
        let backing = dir.path().join("fs").join("v");
        std::fs::create_dir_all(backing.parent().unwrap()).unwrap();
        std::fs::write(&backing, b"").unwrap();

        let (driver, _tools) = create_test_driver(&dir);
        let err = driver.remove("v").await.unwrap_err();
        assert!(matches!(err, LoopvolError::Storage(ref msg) if msg.contains("/proc/self")));
        assert!(driver.get("v").await.is_ok());
        assert!(backing.is_file());
        assert_eq!(driver.metrics().volumes_removed_total(), 0);
    }

    #[tokio::test]
    async fn test_legacy_state_file_name_is_read() {
        let dir = TempDir::new().unwrap();
        let state_dir = dir.path().join("state");
        std::fs::create_dir_all(&state_dir).unwrap();
        std::fs::write(
            state_dir.join("extfs-state.json"),
            r#"{"old":{"Name":"old","Size":"5G","MountPoint":"/mnt/volumes/old"}}"#,
        )
        .unwrap();

        let created_at = {
            let (driver, _tools) = create_test_driver(&dir);
            driver.get("old").await.unwrap().created_at
        };
        assert!(state_dir.join("loopvol-state.json").is_file());

        let (driver, _tools) = create_test_driver(&dir);
        assert_eq!(driver.get("old").await.unwrap().created_at, created_at);
    }

    #[tokio::test]
    async fn test_mount_at_max_count_fails_without_panic() {
        let dir = TempDir::new().unwrap();
        let (driver, _tools) = create_test_driver(&dir);
        driver.create("full", CreateOptions::default()).await.unwrap();
        {
            let mut registry = driver.inner.registry.write().await;
            registry.get_mut("full").unwrap().connections = u32::MAX;
        }

        let err = driver.mount("full").await.unwrap_err();
        assert!(matches!(err, LoopvolError::Internal(_)));
        assert_eq!(connections(&driver, "full").await, u32::MAX);
    }

    #[tokio::test]
    async fn test_from_prepared_layout() {
        let dir = TempDir::new().unwrap();
        let options = DriverOptions::with_root(dir.path());
        let layout = FilesystemLayout::new(options.root_dir.clone(), &options.state_file);
        layout.prepare().unwrap();

        let driver = VolumeDriver::from_layout(options, layout).unwrap();
        assert_eq!(driver.layout().root(), dir.path());
        assert!(driver.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_capabilities_local() {
        let dir = TempDir::new().unwrap();
        let (driver, _tools) = create_test_driver(&dir);
        assert_eq!(driver.capabilities().scope, Scope::Local);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_mounts_issue_one_mount() {
        let dir = TempDir::new().unwrap();
        let (driver, tools) = create_test_driver(&dir);
        driver.create("shared", CreateOptions::default()).await.unwrap();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let driver = driver.clone();
                tokio::spawn(async move { driver.mount("shared").await })
            })
            .collect();
        for result in futures::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }

        assert_eq!(tools.count("mount"), 1);
        assert_eq!(connections(&driver, "shared").await, 16);

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let driver = driver.clone();
                tokio::spawn(async move { driver.unmount("shared").await })
            })
            .collect();
        for result in futures::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }

        assert_eq!(tools.count("umount"), 1);
        assert_eq!(connections(&driver, "shared").await, 0);
    }
}
