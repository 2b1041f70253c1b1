//! Exclusive ownership of a driver root.
//!
//! Only one process may run a driver against a given root. The lock is an
//! advisory `flock(2)` on `<root>/.lock`, released when the handle drops.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use loopvol_shared::{LoopvolError, LoopvolResult};

#[derive(Debug)]
pub struct RuntimeLock {
    file: File,
    path: PathBuf,
}

impl RuntimeLock {
    /// Take the lock without blocking.
    pub fn acquire(path: &Path) -> LoopvolResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| {
                LoopvolError::Initialization(format!(
                    "Failed to open lock file {}: {}",
                    path.display(),
                    e
                ))
            })?;

        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            return Err(LoopvolError::Initialization(format!(
                "root is already in use by another process ({}): {}",
                path.display(),
                err
            )));
        }

        tracing::debug!(lock_path = %path.display(), "Acquired runtime lock");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for RuntimeLock {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
        tracing::trace!(lock_path = %self.path.display(), "Released runtime lock");
    }
}
