//! Filesystem utilities for host-side operations.

use loopvol_shared::{LoopvolError, LoopvolResult};
use std::io::ErrorKind;
use std::path::Path;

/// Make sure `target` is a directory, creating it (and parents) if absent.
///
/// Fails if the path exists but is not a directory.
pub async fn ensure_mount_point(target: &Path) -> LoopvolResult<()> {
    match tokio::fs::symlink_metadata(target).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(LoopvolError::Storage(format!(
            "{} already exists and is not a directory",
            target.display()
        ))),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tokio::fs::create_dir_all(target).await.map_err(|e| {
                LoopvolError::Storage(format!(
                    "Failed to create mount point {}: {}",
                    target.display(),
                    e
                ))
            })
        }
        Err(e) => Err(LoopvolError::Storage(format!(
            "Failed to stat mount point {}: {}",
            target.display(),
            e
        ))),
    }
}

/// Create an empty file if none exists. Existing content is left alone.
pub async fn touch(path: &Path) -> LoopvolResult<()> {
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map(|_| ())
        .map_err(|e| {
            LoopvolError::Storage(format!(
                "Failed to create backing file {}: {}",
                path.display(),
                e
            ))
        })
}

/// Remove a file or directory tree. A missing path is not an error.
pub async fn remove_all(path: &Path) -> LoopvolResult<()> {
    let meta = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(LoopvolError::Storage(format!(
                "Failed to remove {}: {}",
                path.display(),
                e
            )));
        }
    };

    let result = if meta.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(LoopvolError::Storage(format!(
            "Failed to remove {}: {}",
            path.display(),
            e
        ))),
    }
}
