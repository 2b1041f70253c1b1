//! loopvol - loopback-file-backed ext4 volumes for container hosts.
//!
//! Each volume is a sized regular file under `<root>/fs`, formatted as ext4
//! and mounted at `<root>/volumes/<name>` while at least one consumer holds
//! it. [`VolumeDriver`] exposes the plugin-style operations (`create`,
//! `remove`, `mount`, `unmount`, `path`, `get`, `list`, `capabilities`);
//! transports call those and render [`LoopvolError`] for their caller.

pub mod fs;
pub mod runtime;
pub mod store;
pub mod util;
pub mod volumes;

use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub use loopvol_shared::{Capabilities, LoopvolError, LoopvolResult, Scope, VolumeInfo};
pub use runtime::{CreateOptions, DriverMetrics, DriverOptions, FilesystemLayout, VolumeDriver};
pub use util::{SystemToolRunner, ToolRunner};
pub use volumes::VolumeRecord;

use runtime::constants::filenames;

/// Keeps the non-blocking log writer flushing for the life of the process.
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install file logging under `<root>/logs`.
///
/// Filter comes from `RUST_LOG` (default `info`). Only the first call in a
/// process installs a subscriber; later calls are no-ops.
pub fn init_logging_for(layout: &FilesystemLayout) -> LoopvolResult<()> {
    install_logging(layout, false)
}

/// Like [`init_logging_for`], additionally mirroring events to stderr.
pub fn init_logging_with_console(layout: &FilesystemLayout) -> LoopvolResult<()> {
    install_logging(layout, true)
}

fn install_logging(layout: &FilesystemLayout, console: bool) -> LoopvolResult<()> {
    if LOG_GUARD.get().is_some() {
        return Ok(());
    }

    let logs_dir = layout.logs_dir();
    std::fs::create_dir_all(&logs_dir).map_err(|e| {
        LoopvolError::Initialization(format!(
            "Failed to create log directory {}: {}",
            logs_dir.display(),
            e
        ))
    })?;

    let appender = tracing_appender::rolling::daily(&logs_dir, filenames::LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = fmt::layer().with_writer(writer).with_ansi(false);
    let console_layer = console.then(|| fmt::layer().with_writer(std::io::stderr));

    // Another subscriber may already be installed by the embedding process.
    if tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .is_ok()
    {
        let _ = LOG_GUARD.set(guard);
    }

    Ok(())
}
