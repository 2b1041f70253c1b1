//! On-disk layout of the driver root.
//!
//! ```text
//! <root>/
//!   fs/<name>        backing file
//!   volumes/<name>   mount point
//!   state/           snapshot (default location)
//!   logs/            rolling log files
//!   .lock            runtime lock
//! ```

use loopvol_shared::{LoopvolError, LoopvolResult};
use std::path::{Path, PathBuf};

use crate::runtime::constants::filenames;

#[derive(Debug, Clone)]
pub struct FilesystemLayout {
    root: PathBuf,
    state_path: PathBuf,
}

impl FilesystemLayout {
    /// `state_file` is resolved under `root` when relative.
    pub fn new(root: PathBuf, state_file: &Path) -> Self {
        let state_path = if state_file.is_absolute() {
            state_file.to_path_buf()
        } else {
            root.join(state_file)
        };
        Self { root, state_path }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn fs_dir(&self) -> PathBuf {
        self.root.join(filenames::FS_DIR)
    }

    pub fn volumes_dir(&self) -> PathBuf {
        self.root.join(filenames::VOLUMES_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(filenames::LOGS_DIR)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(filenames::LOCK_FILE)
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Snapshot written by earlier releases, next to the current one.
    pub fn legacy_state_path(&self) -> PathBuf {
        self.state_path.with_file_name(filenames::LEGACY_STATE_FILE)
    }

    /// Backing file for `name`.
    pub fn backing_file(&self, name: &str) -> PathBuf {
        self.fs_dir().join(name)
    }

    /// Mount point for `name`.
    pub fn mount_point(&self, name: &str) -> PathBuf {
        self.volumes_dir().join(name)
    }

    /// Validate the root and create the driver's subdirectories.
    pub fn prepare(&self) -> LoopvolResult<()> {
        if !self.root.is_absolute() {
            return Err(LoopvolError::Initialization(format!(
                "root directory must be an absolute path, got: {}",
                self.root.display()
            )));
        }

        match std::fs::metadata(&self.root) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(LoopvolError::Initialization(format!(
                    "root {} is not a directory",
                    self.root.display()
                )));
            }
            Err(e) => {
                return Err(LoopvolError::Initialization(format!(
                    "root {} is not accessible: {}",
                    self.root.display(),
                    e
                )));
            }
        }

        let mut dirs = vec![self.fs_dir(), self.volumes_dir(), self.logs_dir()];
        if let Some(parent) = self.state_path.parent() {
            dirs.push(parent.to_path_buf());
        }

        for dir in dirs {
            ensure_dir(&dir)?;
        }
        Ok(())
    }
}

fn ensure_dir(dir: &Path) -> LoopvolResult<()> {
    match std::fs::symlink_metadata(dir) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(LoopvolError::Initialization(format!(
            "a file exists at {}, expected a directory",
            dir.display()
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            std::fs::create_dir_all(dir).map_err(|e| {
                LoopvolError::Initialization(format!(
                    "Failed to create {}: {}",
                    dir.display(),
                    e
                ))
            })
        }
        Err(e) => Err(LoopvolError::Initialization(format!(
            "Failed to stat {}: {}",
            dir.display(),
            e
        ))),
    }
}
