//! Snapshot persistence for the volume registry.
//!
//! The whole registry is stored as one JSON object keyed by volume name.
//! Writes go to a temporary file in the same directory which is then renamed
//! over the snapshot, so a crash leaves either the old or the new snapshot.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use loopvol_shared::{LoopvolError, LoopvolResult};
use tempfile::NamedTempFile;

use crate::volumes::VolumeRecord;

/// Name-keyed snapshot contents.
pub type VolumeMap = HashMap<String, VolumeRecord>;

/// Durable location of the registry snapshot.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    fallback: Option<PathBuf>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fallback: None,
        }
    }

    /// Read from `fallback` while the snapshot itself does not exist yet.
    ///
    /// Saves always go to the primary path.
    pub fn with_fallback(mut self, fallback: impl Into<PathBuf>) -> Self {
        let fallback = fallback.into();
        if fallback != self.path {
            self.fallback = Some(fallback);
        }
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the next [`load`](Self::load) reads the fallback snapshot.
    pub fn reads_fallback(&self) -> bool {
        !self.path.exists() && self.fallback.as_ref().is_some_and(|p| p.exists())
    }

    /// Read the snapshot.
    ///
    /// A missing file is the first-run state and yields an empty map.
    /// Unreadable or undecodable snapshots are fatal for startup.
    pub fn load(&self) -> LoopvolResult<VolumeMap> {
        match self.fallback.as_deref() {
            Some(fallback) if self.reads_fallback() => {
                tracing::info!(
                    state_path = %self.path.display(),
                    fallback = %fallback.display(),
                    "Reading state from fallback snapshot"
                );
                read_snapshot(fallback)
            }
            _ => read_snapshot(&self.path),
        }
    }

    /// Write the full snapshot (temp file + rename).
    pub fn save(&self, volumes: &VolumeMap) -> LoopvolResult<()> {
        let data = serde_json::to_vec_pretty(volumes).map_err(|e| {
            LoopvolError::Persistence(format!("Failed to encode state: {}", e))
        })?;

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let persist_err = |e: &dyn std::fmt::Display| {
            LoopvolError::Persistence(format!(
                "Failed to write state {}: {}",
                self.path.display(),
                e
            ))
        };

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| persist_err(&e))?;
        tmp.write_all(&data).map_err(|e| persist_err(&e))?;
        tmp.as_file().sync_all().map_err(|e| persist_err(&e))?;
        tmp.persist(&self.path).map_err(|e| persist_err(&e.error))?;

        tracing::trace!(state_path = %self.path.display(), volumes = volumes.len(), "Saved state");
        Ok(())
    }
}

fn read_snapshot(path: &Path) -> LoopvolResult<VolumeMap> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(state_path = %path.display(), "No state found");
            return Ok(VolumeMap::new());
        }
        Err(e) => {
            return Err(LoopvolError::Initialization(format!(
                "Failed to read state {}: {}",
                path.display(),
                e
            )));
        }
    };

    let volumes: VolumeMap = serde_json::from_slice(&data).map_err(|e| {
        LoopvolError::Initialization(format!(
            "Failed to decode state {}: {}",
            path.display(),
            e
        ))
    })?;

    tracing::debug!(
        state_path = %path.display(),
        volumes = volumes.len(),
        "Loaded state"
    );
    Ok(volumes)
}
