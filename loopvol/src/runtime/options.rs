//! Driver and request options.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::runtime::constants::{envs, filenames};
use crate::volumes::constants::{DEFAULT_SIZE, SIZE_OPTION};

/// Configuration for a [`VolumeDriver`](crate::VolumeDriver).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverOptions {
    /// Root directory holding backing files, mount points and state.
    pub root_dir: PathBuf,
    /// Snapshot location. Relative paths resolve under `root_dir`.
    pub state_file: PathBuf,
    /// Size used when a create request carries none.
    pub default_size: String,
}

impl Default for DriverOptions {
    fn default() -> Self {
        let root_dir = std::env::var_os(envs::LOOPVOL_ROOT)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(filenames::DEFAULT_ROOT));

        Self {
            root_dir,
            state_file: PathBuf::from(filenames::STATE_DIR).join(filenames::STATE_FILE),
            default_size: DEFAULT_SIZE.to_string(),
        }
    }
}

impl DriverOptions {
    pub fn with_root(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Default::default()
        }
    }
}

/// Options accepted by `create`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOptions {
    /// Backing file size (`truncate -s` syntax). Falls back to the driver default.
    pub size: Option<String>,
}

impl CreateOptions {
    pub fn with_size(size: impl Into<String>) -> Self {
        Self {
            size: Some(size.into()),
        }
    }

    /// Pick the options this driver understands out of a plugin request's
    /// free-form option map. Unknown keys are ignored.
    pub fn from_map(options: &HashMap<String, String>) -> Self {
        Self {
            size: options.get(SIZE_OPTION).cloned(),
        }
    }
}
