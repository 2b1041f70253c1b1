use chrono::{DateTime, Utc};
use loopvol_shared::{LoopvolError, LoopvolResult, VolumeInfo};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::constants::SIZE_SUFFIXES;

/// One managed volume.
///
/// `name`, `size` and `mount_point` are fixed at creation. `connections`
/// is the only mutable field and counts consumers currently holding the
/// volume mounted.
///
/// Field names are PascalCase on disk so snapshots written by earlier
/// releases of the driver keep loading. Those releases wrote
/// `state/extfs-state.json`; the driver reads that file while the current
/// snapshot does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeRecord {
    pub name: String,
    pub size: String,
    pub mount_point: PathBuf,
    #[serde(default)]
    pub connections: u32,
    /// Unix epoch when the snapshot carried no timestamp; see
    /// [`has_creation_time`](Self::has_creation_time).
    #[serde(default)]
    pub created_at: DateTime<Utc>,
}

impl VolumeRecord {
    pub fn new(name: &str, size: &str, mount_point: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            size: size.to_string(),
            mount_point,
            connections: 0,
            created_at: Utc::now(),
        }
    }

    pub fn has_creation_time(&self) -> bool {
        self.created_at != DateTime::<Utc>::default()
    }

    pub fn is_in_use(&self) -> bool {
        self.connections > 0
    }

    pub fn info(&self) -> VolumeInfo {
        VolumeInfo {
            name: self.name.clone(),
            mountpoint: self.mount_point.clone(),
            created_at: self.created_at,
        }
    }
}

/// Reject names that are not a single safe path component.
///
/// The name is joined onto both the backing file directory and the mount
/// point directory, so separators and dot components are refused.
pub fn validate_name(name: &str) -> LoopvolResult<()> {
    if name.is_empty() {
        return Err(LoopvolError::Config("volume name is empty".to_string()));
    }
    if name == "." || name == ".." {
        return Err(LoopvolError::Config(format!(
            "volume name {:?} is not allowed",
            name
        )));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(LoopvolError::Config(format!(
            "volume name {:?} must not contain '/' or NUL",
            name
        )));
    }
    Ok(())
}

/// Check a size spec against the `truncate -s` grammar we accept:
/// digits, then an optional unit (`K`..`Y`) optionally followed by `B` or `iB`.
pub fn validate_size(size: &str) -> LoopvolResult<()> {
    let invalid = || LoopvolError::Config(format!("invalid size {:?}", size));

    let digits_end = size
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(size.len());
    if digits_end == 0 {
        return Err(invalid());
    }

    let mut rest = size[digits_end..].chars();
    match rest.next() {
        None => Ok(()),
        Some(unit) if SIZE_SUFFIXES.contains(&unit) => match rest.as_str() {
            "" | "B" | "iB" => Ok(()),
            _ => Err(invalid()),
        },
        Some(_) => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("data").is_ok());
        assert!(validate_name("my-vol_1.2").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name(".").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("../etc").is_err());
        assert!(validate_name("a/b").is_err());
    }

    #[test]
    fn test_validate_size() {
        for ok in ["10G", "5G", "512", "1K", "100MiB", "2TB"] {
            assert!(validate_size(ok).is_ok(), "{} should be accepted", ok);
        }
        for bad in ["", "G", "10X", "10GG", "-5G", "10 G", "1.5G"] {
            assert!(validate_size(bad).is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_legacy_record_without_connections_or_timestamp() {
        let json = r#"{"Name":"data","Size":"5G","MountPoint":"/mnt/volumes/data"}"#;
        let record: VolumeRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.name, "data");
        assert_eq!(record.size, "5G");
        assert_eq!(record.mount_point, PathBuf::from("/mnt/volumes/data"));
        assert_eq!(record.connections, 0);
        assert!(!record.has_creation_time());
    }
}
