//! Volume and tooling constants.
//!
//! Centralized location for sizing defaults and external command names.

/// Default size when a create request does not carry one.
pub const DEFAULT_SIZE: &str = "10G";

/// Option key carrying the size in create requests.
pub const SIZE_OPTION: &str = "size";

/// Backing file formatting
pub mod ext4 {
    /// Filesystem type passed to the formatter.
    pub const FS_TYPE: &str = "ext4";

    /// Formatter binary (e2fsprogs).
    pub const MKFS: &str = "mke2fs";
}

/// External commands invoked by the driver
pub mod tools {
    /// Resizes the backing file (`truncate -s SIZE FILE`).
    pub const TRUNCATE: &str = "truncate";

    /// Attaches the backing file at the mount point (`mount FILE DIR`).
    pub const MOUNT: &str = "mount";

    /// Detaches the mount point (`umount DIR`).
    pub const UMOUNT: &str = "umount";
}

/// Size suffixes accepted by `truncate -s`.
pub const SIZE_SUFFIXES: &[char] = &['K', 'M', 'G', 'T', 'P', 'E', 'Z', 'Y'];
